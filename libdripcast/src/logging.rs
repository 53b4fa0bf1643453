//! Log setup for the dripcast binaries
//!
//! Both binaries log through `tracing` to stderr and share this one
//! init path: the daemon runs at info by default, the CLI at error,
//! and `--verbose` drops either to debug. `DRIPCAST_LOG_FORMAT`
//! switches between line-per-event text and JSON for log shippers.

use std::env;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text on stderr, suitable for piping
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Install the global subscriber for a binary whose quiet level is
/// `default_level`. Call once, at startup; panics if a subscriber is
/// already installed. A set `RUST_LOG` overrides the resolved level.
pub fn init(default_level: &str, verbose: bool) {
    let (format, level) = resolve_from_env(default_level, verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

/// Format and level from `DRIPCAST_LOG_FORMAT` and `DRIPCAST_LOG_LEVEL`.
/// An unknown format falls back to text. `--verbose` beats the env
/// level.
fn resolve_from_env(default_level: &str, verbose: bool) -> (LogFormat, String) {
    let format = env::var("DRIPCAST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let level = if verbose {
        "debug".to_string()
    } else {
        env::var("DRIPCAST_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string())
    };

    (format, level)
}
