//! Dripcast - multi-account posting queue and scheduler
//!
//! This library provides the core of a social-posting automation system:
//! a persistent posting queue with per-account rate limiting, retrying
//! dispatch to an external post API or a device-automation bridge, and
//! bulk schedule planning across many accounts.

pub mod api;
pub mod config;
pub mod db;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod mock;
pub mod processor;
pub mod ratelimit;
pub mod scheduler;
pub mod timeparse;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{ClaimedItem, Database};
pub use dispatch::Dispatcher;
pub use error::{DripcastError, Result};
pub use processor::{QueueProcessor, TickOutcome, TickSummary};
pub use scheduler::{BulkScheduleRequest, BulkScheduleSummary, BulkScheduler};
pub use types::{Account, Content, Platform, QueueItem, QueueStatus};
