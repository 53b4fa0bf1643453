//! Queue processing loop
//!
//! Claims due queue items in schedule order and works through them one at
//! a time: rate-limit check, dispatch, then the resulting state
//! transition. Failures consume an attempt and reschedule with
//! exponential backoff until the attempt cap, rate-limit denials pause
//! the item without consuming an attempt. One tick runs at a time per
//! processor instance; an overlapping call is skipped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::db::{ClaimedItem, Database};
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Result};
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::types::QueueItem;

/// Base retry delay in seconds; doubles with every consumed attempt.
const BACKOFF_BASE_SECS: i64 = 300;
/// How long a rate-limited item waits before becoming claimable again.
const RATE_LIMIT_PAUSE_SECS: i64 = 300;

/// Retry delay in seconds after `attempts` consumed attempts.
///
/// `2^n * 5 min`: 10 minutes after the first failure, 20 after the
/// second, 40 after the third. Saturates instead of overflowing.
pub fn backoff(attempts: i64) -> i64 {
    let exp = attempts.clamp(0, 62) as u32;
    2_i64.saturating_pow(exp).saturating_mul(BACKOFF_BASE_SECS)
}

/// What one `tick` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran to completion.
    Completed(TickSummary),
    /// Another tick on this processor was still running; nothing touched.
    AlreadyRunning,
}

/// Per-tick counts for daemon logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub claimed: usize,
    pub posted: usize,
    pub retried: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub skipped: usize,
}

impl std::fmt::Display for TickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "claimed {}: {} posted, {} retried, {} failed, {} rate-limited, {} skipped",
            self.claimed, self.posted, self.retried, self.failed, self.rate_limited, self.skipped
        )
    }
}

/// Clears the running flag when a tick exits, on every path.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives queue items through their state machine.
pub struct QueueProcessor {
    db: Database,
    dispatcher: Dispatcher,
    limiter: RateLimiter,
    batch_size: i64,
    inter_item_delay: Duration,
    running: AtomicBool,
}

impl QueueProcessor {
    pub fn new(db: Database, dispatcher: Dispatcher, queue: &QueueConfig) -> Self {
        Self {
            limiter: RateLimiter::new(db.clone()),
            db,
            dispatcher,
            batch_size: queue.batch_size,
            inter_item_delay: Duration::from_millis(queue.inter_item_delay_ms),
            running: AtomicBool::new(false),
        }
    }

    /// Run one processing pass over the due queue.
    ///
    /// Items run strictly sequentially, separated by the configured
    /// inter-item delay. A failure on one item never halts the tick.
    ///
    /// # Errors
    ///
    /// Returns an error only when the due items cannot be claimed at all;
    /// per-item store failures are logged and skipped.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Skipping tick: previous tick still running");
            return Ok(TickOutcome::AlreadyRunning);
        }
        let _guard = TickGuard(&self.running);

        let now = chrono::Utc::now().timestamp();
        let claimed = self.db.claim_due(now, self.batch_size).await?;

        let mut summary = TickSummary {
            claimed: claimed.len(),
            ..TickSummary::default()
        };
        if claimed.is_empty() {
            return Ok(TickOutcome::Completed(summary));
        }

        info!("Processing {} due queue items", claimed.len());
        let total = claimed.len();
        for (index, claimed_item) in claimed.into_iter().enumerate() {
            self.process_item(claimed_item, &mut summary).await;
            if index + 1 < total && !self.inter_item_delay.is_zero() {
                sleep(self.inter_item_delay).await;
            }
        }

        Ok(TickOutcome::Completed(summary))
    }

    async fn process_item(&self, claimed: ClaimedItem, summary: &mut TickSummary) {
        let ClaimedItem { item, account } = claimed;

        // Items without a usable account stay untouched and claimable, in
        // case the account comes back.
        let account = match account {
            Some(account) if account.is_active() => account,
            Some(account) => {
                debug!(
                    item_id = %item.id,
                    account_id = %item.account_id,
                    status = %account.status,
                    "Skipping item: account not active"
                );
                summary.skipped += 1;
                return;
            }
            None => {
                debug!(
                    item_id = %item.id,
                    account_id = %item.account_id,
                    "Skipping item: account not found"
                );
                summary.skipped += 1;
                return;
            }
        };

        let now = chrono::Utc::now().timestamp();

        match self
            .limiter
            .can_execute(&account, item.content.kind(), now)
            .await
        {
            Ok(RateDecision::Allowed) => {}
            Ok(decision) => {
                let resume_at = now + RATE_LIMIT_PAUSE_SECS;
                info!(
                    item_id = %item.id,
                    account_id = %account.id,
                    resume_at,
                    "Rate limited: {}",
                    decision
                );
                if let Err(e) = self.db.mark_rate_limited(&item.id, resume_at).await {
                    warn!(item_id = %item.id, "Failed to mark item rate-limited: {}", e);
                }
                summary.rate_limited += 1;
                return;
            }
            Err(e) => {
                warn!(item_id = %item.id, "Rate limit check failed: {}", e);
                summary.skipped += 1;
                return;
            }
        }

        if let Err(e) = self.db.mark_processing(&item.id).await {
            warn!(item_id = %item.id, "Failed to mark item processing: {}", e);
            summary.skipped += 1;
            return;
        }

        match self.dispatcher.execute(&item, &account).await {
            Ok(outcome) => {
                info!(
                    item_id = %item.id,
                    account = %account.username,
                    "Dispatched item: {}",
                    outcome.describe()
                );
                if let Err(e) = self.db.mark_posted(&item.id, now).await {
                    warn!(item_id = %item.id, "Failed to mark item posted: {}", e);
                }
                summary.posted += 1;
            }
            Err(error) => self.fail_item(&item, &error, now, summary).await,
        }
    }

    async fn fail_item(
        &self,
        item: &QueueItem,
        error: &DispatchError,
        now: i64,
        summary: &mut TickSummary,
    ) {
        let attempts = item.attempts + 1;

        if attempts >= item.max_attempts {
            warn!(
                item_id = %item.id,
                attempts,
                "Dispatch failed, attempt cap reached: {}",
                error
            );
            if let Err(e) = self
                .db
                .mark_failed(&item.id, attempts, &error.to_string())
                .await
            {
                warn!(item_id = %item.id, "Failed to mark item failed: {}", e);
            }
            summary.failed += 1;
        } else {
            let resume_at = now + backoff(attempts);
            warn!(
                item_id = %item.id,
                attempts,
                resume_at,
                "Dispatch failed, will retry: {}",
                error
            );
            if let Err(e) = self
                .db
                .mark_retry(&item.id, attempts, resume_at, &error.to_string())
                .await
            {
                warn!(item_id = %item.id, "Failed to mark item for retry: {}", e);
            }
            summary.retried += 1;
        }
    }
}
