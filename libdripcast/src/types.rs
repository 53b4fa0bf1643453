//! Core types for Dripcast

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DripcastError, Result};

/// Default priority assigned to queue items when the caller does not pick one.
pub const DEFAULT_PRIORITY: i64 = 5;
/// Default execution attempt cap.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// A unit of scheduled posting work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub content: Content,
    pub scheduled_for: i64,
    pub priority: i64,
    pub status: QueueStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error_message: Option<String>,
    pub posted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Optional knobs for a single enqueue. The defaults match what the
/// queue assumes elsewhere: due immediately, priority 5, three attempts.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub scheduled_for: Option<i64>,
    pub priority: i64,
    pub max_attempts: i64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            scheduled_for: None,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Narrows a bulk cancellation. An empty filter cancels every waiting
/// item the tenant owns.
#[derive(Debug, Clone, Default)]
pub struct CancelFilter {
    pub account_id: Option<String>,
    pub platform: Option<Platform>,
    pub before: Option<i64>,
}

impl QueueItem {
    pub fn new(user_id: &str, account_id: &str, content: Content, opts: EnqueueOptions) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            content,
            scheduled_for: opts.scheduled_for.unwrap_or(now),
            priority: opts.priority,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: opts.max_attempts,
            error_message: None,
            posted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Queue item state machine.
///
/// `pending -> processing -> {posted | pending (retry) | failed}`, with
/// `pending <-> rate_limited` toggling on throttle decisions. `cancelled`
/// is only ever applied from outside the processor loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Posted,
    Failed,
    RateLimited,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Posted => "posted",
            Self::Failed => "failed",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status string from the store. Unknown values fall back to
    /// `Pending` so a hand-edited row cannot wedge the processor.
    pub fn from_db(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "posted" => Self::Posted,
            "failed" => Self::Failed,
            "rate_limited" => Self::RateLimited,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    /// Terminal states are never mutated again by the processor.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Posted | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a queue item, tagged by action kind.
///
/// The tag doubles as the rate-limit action type, so it is also persisted
/// in its own column (see `Database::insert_item`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Post {
        text: String,
        media_url: Option<String>,
        variation_id: Option<String>,
    },
    Dm {
        recipient: String,
        text: String,
    },
}

impl Content {
    pub fn text_post(text: impl Into<String>) -> Self {
        Self::Post {
            text: text.into(),
            media_url: None,
            variation_id: None,
        }
    }

    /// The action-type tag used for rate-limit grouping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Post { .. } => "post",
            Self::Dm { .. } => "dm",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Post { text, .. } => text,
            Self::Dm { text, .. } => text,
        }
    }
}

/// Target platform for an account or profile key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Tiktok,
    Instagram,
    Youtube,
    Facebook,
    Linkedin,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Linkedin => "linkedin",
        }
    }

    /// Maximum caption length the platform accepts. Dispatch truncates to
    /// this, it never rejects.
    pub fn caption_limit(&self) -> usize {
        match self {
            Self::Twitter => 280,
            Self::Tiktok => 2200,
            Self::Instagram => 2200,
            Self::Linkedin => 3000,
            Self::Youtube => 5000,
            Self::Facebook => 63_206,
        }
    }

    pub fn all() -> &'static [Platform] {
        &[
            Self::Twitter,
            Self::Tiktok,
            Self::Instagram,
            Self::Youtube,
            Self::Facebook,
            Self::Linkedin,
        ]
    }
}

impl std::str::FromStr for Platform {
    type Err = DripcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Self::Twitter),
            "tiktok" => Ok(Self::Tiktok),
            "instagram" => Ok(Self::Instagram),
            "youtube" => Ok(Self::Youtube),
            "facebook" => Ok(Self::Facebook),
            "linkedin" => Ok(Self::Linkedin),
            other => Err(DripcastError::InvalidInput(format!(
                "unknown platform: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Disabled => "disabled",
        }
    }

    /// Unknown strings map to `Disabled`: an unrecognized account state
    /// must never receive work.
    pub fn from_db(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Disabled,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A connected social account. Read-only from the queue's perspective.
///
/// `device_id` present means the account posts through device automation.
/// `profile_keys` maps each platform the external post API can address for
/// this account to its opaque profile key; more than one entry means the
/// account has multi-platform linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub username: String,
    pub status: AccountStatus,
    pub device_id: Option<String>,
    pub profile_keys: HashMap<Platform, String>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Profile keys in stable platform order, for deterministic multi-posts.
    pub fn linked_keys(&self) -> Vec<(Platform, String)> {
        let mut keys: Vec<(Platform, String)> = self
            .profile_keys
            .iter()
            .map(|(p, k)| (*p, k.clone()))
            .collect();
        keys.sort_by_key(|(p, _)| *p);
        keys
    }
}

/// Per (platform, action type) throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub platform: Platform,
    pub action_type: String,
    pub max_per_hour: i64,
    pub max_per_day: i64,
    pub cooldown_seconds: i64,
}

/// An unposted piece of content available to the bulk scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub quality_score: f64,
    pub used: bool,
    pub posted_to_accounts: Vec<String>,
    pub created_at: i64,
}

impl ContentEntry {
    pub fn new(user_id: &str, body: &str, quality_score: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            body: body.to_string(),
            quality_score,
            used: false,
            posted_to_accounts: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Per-status queue counts for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub posted: i64,
    pub failed: i64,
    pub rate_limited: i64,
    pub cancelled: i64,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_item_new_uuid_generation() {
        let item = QueueItem::new(
            "user-1",
            "acct-1",
            Content::text_post("hello"),
            EnqueueOptions::default(),
        );

        let uuid_result = uuid::Uuid::parse_str(&item.id);
        assert!(uuid_result.is_ok(), "Item ID should be a valid UUID");
        assert_eq!(uuid_result.unwrap().get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn test_queue_item_new_defaults() {
        let before = chrono::Utc::now().timestamp();
        let item = QueueItem::new(
            "user-1",
            "acct-1",
            Content::text_post("hello"),
            EnqueueOptions::default(),
        );
        let after = chrono::Utc::now().timestamp();

        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.priority, 5);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(item.error_message, None);
        assert_eq!(item.posted_at, None);
        // scheduled_for defaults to "now"
        assert!(item.scheduled_for >= before && item.scheduled_for <= after);
        assert_eq!(item.scheduled_for, item.created_at);
    }

    #[test]
    fn test_queue_item_new_explicit_options() {
        let item = QueueItem::new(
            "user-1",
            "acct-1",
            Content::text_post("hello"),
            EnqueueOptions {
                scheduled_for: Some(1_900_000_000),
                priority: 1,
                max_attempts: 5,
            },
        );

        assert_eq!(item.scheduled_for, 1_900_000_000);
        assert_eq!(item.priority, 1);
        assert_eq!(item.max_attempts, 5);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Posted,
            QueueStatus::Failed,
            QueueStatus::RateLimited,
            QueueStatus::Cancelled,
        ] {
            assert_eq!(QueueStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn test_status_unknown_falls_back_to_pending() {
        assert_eq!(QueueStatus::from_db("garbage"), QueueStatus::Pending);
        assert_eq!(QueueStatus::from_db(""), QueueStatus::Pending);
    }

    #[test]
    fn test_status_terminal() {
        assert!(QueueStatus::Posted.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(QueueStatus::Cancelled.is_terminal());
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
        assert!(!QueueStatus::RateLimited.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&QueueStatus::RateLimited).unwrap();
        assert_eq!(json, r#""rate_limited""#);
    }

    #[test]
    fn test_content_tagged_serialization() {
        let content = Content::Post {
            text: "hello".to_string(),
            media_url: None,
            variation_id: Some("var-1".to_string()),
        };

        let json = serde_json::to_string(&content).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "post");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["variation_id"], "var-1");

        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_content_dm_serialization() {
        let content = Content::Dm {
            recipient: "@someone".to_string(),
            text: "hi there".to_string(),
        };

        let json = serde_json::to_string(&content).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "dm");
        assert_eq!(value["recipient"], "@someone");

        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_content_kind_and_text() {
        let post = Content::text_post("a");
        let dm = Content::Dm {
            recipient: "r".to_string(),
            text: "b".to_string(),
        };

        assert_eq!(post.kind(), "post");
        assert_eq!(dm.kind(), "dm");
        assert_eq!(post.text(), "a");
        assert_eq!(dm.text(), "b");
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("twitter".parse::<Platform>().unwrap(), Platform::Twitter);
        assert_eq!("X".parse::<Platform>().unwrap(), Platform::Twitter);
        assert_eq!("TikTok".parse::<Platform>().unwrap(), Platform::Tiktok);
        assert!("friendster".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_caption_limits() {
        assert_eq!(Platform::Twitter.caption_limit(), 280);
        assert_eq!(Platform::Tiktok.caption_limit(), 2200);
        assert!(Platform::Facebook.caption_limit() > Platform::Linkedin.caption_limit());
    }

    #[test]
    fn test_platform_as_map_key() {
        let mut keys = HashMap::new();
        keys.insert(Platform::Twitter, "key-tw".to_string());
        keys.insert(Platform::Tiktok, "key-tt".to_string());

        let json = serde_json::to_string(&keys).unwrap();
        assert!(json.contains(r#""twitter":"key-tw""#));

        let back: HashMap<Platform, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&Platform::Tiktok).unwrap(), "key-tt");
    }

    #[test]
    fn test_account_status_from_db() {
        assert_eq!(AccountStatus::from_db("active"), AccountStatus::Active);
        assert_eq!(AccountStatus::from_db("suspended"), AccountStatus::Suspended);
        assert_eq!(AccountStatus::from_db("banned"), AccountStatus::Disabled);
    }

    #[test]
    fn test_account_linked_keys_sorted() {
        let mut profile_keys = HashMap::new();
        profile_keys.insert(Platform::Tiktok, "tt".to_string());
        profile_keys.insert(Platform::Twitter, "tw".to_string());

        let account = Account {
            id: "acct-1".to_string(),
            user_id: "user-1".to_string(),
            platform: Platform::Twitter,
            username: "tester".to_string(),
            status: AccountStatus::Active,
            device_id: None,
            profile_keys,
        };

        let keys = account.linked_keys();
        assert_eq!(keys.len(), 2);
        // Declaration order of the Platform enum, not hash order
        assert_eq!(keys[0].0, Platform::Twitter);
        assert_eq!(keys[1].0, Platform::Tiktok);
    }

    #[test]
    fn test_content_entry_new() {
        let entry = ContentEntry::new("user-1", "body text", 0.9);

        assert!(uuid::Uuid::parse_str(&entry.id).is_ok());
        assert!(!entry.used);
        assert!(entry.posted_to_accounts.is_empty());
        assert!(entry.created_at > 1_600_000_000);
    }
}
