//! Rate limiting for queued posting actions
//!
//! Decides whether an account may execute an action right now, based on
//! trailing hour and day windows plus a cooldown against the most recent
//! completion. All decisions are reads; nothing here consumes quota.

use tracing::warn;

use crate::db::Database;
use crate::error::Result;
use crate::types::Account;

const HOUR_WINDOW: i64 = 3600;
const DAY_WINDOW: i64 = 86_400;

/// Outcome of a rate check, carrying enough to explain a denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    HourlyCapReached { limit: i64 },
    DailyCapReached { limit: i64 },
    CoolingDown { until: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl std::fmt::Display for RateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::HourlyCapReached { limit } => {
                write!(f, "hourly limit reached ({}/hour)", limit)
            }
            Self::DailyCapReached { limit } => {
                write!(f, "daily limit reached ({}/day)", limit)
            }
            Self::CoolingDown { until } => write!(f, "cooldown active until {}", until),
        }
    }
}

/// Rate limiter over the posting history in the queue store.
pub struct RateLimiter {
    db: Database,
}

impl RateLimiter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Check whether `account` may execute `action_type` at `now`.
    ///
    /// Checks run in order: hour window, day window, cooldown, each one
    /// short-circuiting. A platform and action with no configured rule is
    /// allowed through with a warning rather than blocked; a missing rule
    /// is a configuration gap, not a throttle.
    pub async fn can_execute(
        &self,
        account: &Account,
        action_type: &str,
        now: i64,
    ) -> Result<RateDecision> {
        let rule = match self
            .db
            .rate_limit_rule(account.platform, action_type)
            .await?
        {
            Some(rule) => rule,
            None => {
                warn!(
                    platform = %account.platform,
                    action_type,
                    "No rate limit rule configured, allowing"
                );
                return Ok(RateDecision::Allowed);
            }
        };

        let hour_count = self
            .db
            .count_posted_since(&account.id, action_type, now - HOUR_WINDOW)
            .await?;
        if hour_count >= rule.max_per_hour {
            return Ok(RateDecision::HourlyCapReached {
                limit: rule.max_per_hour,
            });
        }

        let day_count = self
            .db
            .count_posted_since(&account.id, action_type, now - DAY_WINDOW)
            .await?;
        if day_count >= rule.max_per_day {
            return Ok(RateDecision::DailyCapReached {
                limit: rule.max_per_day,
            });
        }

        if let Some(last) = self.db.last_posted_at(&account.id, action_type).await? {
            if now - last < rule.cooldown_seconds {
                return Ok(RateDecision::CoolingDown {
                    until: last + rule.cooldown_seconds,
                });
            }
        }

        Ok(RateDecision::Allowed)
    }
}
