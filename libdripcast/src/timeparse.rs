//! Schedule time parsing
//!
//! Parses the human-readable time formats the CLI accepts for scheduling
//! queue items.

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;

use crate::error::{DripcastError, Result};

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600; // 30 days

/// Parse a schedule string into unix seconds.
///
/// Supported formats:
/// - `now`
/// - Relative durations: `30m`, `2h`, `1d`
/// - Absolute times: RFC 3339 (`2025-11-20T15:00:00Z`) or
///   `2025-11-20 15:00` (UTC)
/// - Random intervals: `random:10m-20m`, chained onto `last_scheduled`
///   when given so repeated calls drip forward
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_when(input: &str, last_scheduled: Option<i64>) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DripcastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input == "now" {
        return Ok(Utc::now().timestamp());
    }

    if input.starts_with("random:") {
        return parse_random(input, last_scheduled);
    }

    if let Ok(seconds) = parse_duration_secs(input) {
        return Ok(Utc::now().timestamp().saturating_add(seconds));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        return Ok(naive.and_utc().timestamp());
    }

    Err(DripcastError::InvalidInput(format!(
        "Could not parse schedule time: {}",
        input
    )))
}

/// Parse a duration string into whole seconds.
fn parse_duration_secs(input: &str) -> Result<i64> {
    let duration = humantime::parse_duration(input).map_err(|_| {
        DripcastError::InvalidInput(format!("Could not parse duration: {}", input))
    })?;

    i64::try_from(duration.as_secs())
        .map_err(|_| DripcastError::InvalidInput("Duration out of range".to_string()))
}

/// Parse random schedule format: "random:MIN-MAX"
fn parse_random(input: &str, last_scheduled: Option<i64>) -> Result<i64> {
    let range_part = input
        .strip_prefix("random:")
        .ok_or_else(|| DripcastError::InvalidInput("Invalid random format".to_string()))?;

    let (min_str, max_str) = split_random_range(range_part)?;
    let min_secs = parse_duration_secs(min_str)?;
    let max_secs = parse_duration_secs(max_str)?;
    validate_random_range(min_secs, max_secs)?;

    let base = last_scheduled.unwrap_or_else(|| Utc::now().timestamp());
    let offset = rand::thread_rng().gen_range(min_secs..=max_secs);

    Ok(base.saturating_add(offset))
}

/// Split "MIN-MAX" into (MIN, MAX)
fn split_random_range(range: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(DripcastError::InvalidInput(
            "Random format must be MIN-MAX".to_string(),
        ));
    }
    Ok((parts[0], parts[1]))
}

fn validate_random_range(min_secs: i64, max_secs: i64) -> Result<()> {
    if min_secs < MIN_RANDOM_SECONDS {
        return Err(DripcastError::InvalidInput(format!(
            "Minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }

    if max_secs > MAX_RANDOM_SECONDS {
        return Err(DripcastError::InvalidInput(format!(
            "Maximum random interval must be less than {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }

    if min_secs >= max_secs {
        return Err(DripcastError::InvalidInput(
            "Minimum must be less than maximum".to_string(),
        ));
    }

    Ok(())
}
