//! Database operations for Dripcast

use std::collections::HashMap;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::path::Path;

use crate::error::Result;
use crate::types::{
    Account, AccountStatus, CancelFilter, ContentEntry, Platform, QueueItem, QueueStats,
    QueueStatus, RateLimitRule,
};

/// Rows per transaction when bulk-inserting queue items.
const BULK_CHUNK: usize = 1000;

/// A due queue item together with its joined account row. `account` is
/// `None` when the account was deleted or its row cannot be decoded.
#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub item: QueueItem,
    pub account: Option<Account>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // Create connection pool
        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert a single queue item.
    ///
    /// The content kind is denormalized into its own column so the rate
    /// window queries can filter on it without decoding JSON.
    pub async fn insert_item(&self, item: &QueueItem) -> Result<()> {
        let content_data =
            serde_json::to_string(&item.content).map_err(crate::error::DbError::Encoding)?;

        sqlx::query(
            r#"
            INSERT INTO posting_queue
                (id, user_id, account_id, content_type, content_data, scheduled_for,
                 priority, status, attempts, max_attempts, error_message, posted_at,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.user_id)
        .bind(&item.account_id)
        .bind(item.content.kind())
        .bind(&content_data)
        .bind(item.scheduled_for)
        .bind(item.priority)
        .bind(item.status.as_str())
        .bind(item.attempts)
        .bind(item.max_attempts)
        .bind(&item.error_message)
        .bind(item.posted_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Insert many queue items in chunks of [`BULK_CHUNK`], one transaction
    /// per chunk. A failing chunk aborts the remaining chunks; chunks
    /// already committed stay committed, and the error carries how many
    /// rows made it in.
    pub async fn bulk_insert_items(&self, items: &[QueueItem]) -> Result<usize> {
        let mut payloads = Vec::with_capacity(items.len());
        for item in items {
            let content_data =
                serde_json::to_string(&item.content).map_err(crate::error::DbError::Encoding)?;
            payloads.push((item, content_data));
        }

        let mut inserted = 0usize;
        for chunk in payloads.chunks(BULK_CHUNK) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| crate::error::DbError::BulkAborted {
                    inserted,
                    source: e,
                })?;

            for (item, content_data) in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO posting_queue
                        (id, user_id, account_id, content_type, content_data, scheduled_for,
                         priority, status, attempts, max_attempts, error_message, posted_at,
                         created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&item.id)
                .bind(&item.user_id)
                .bind(&item.account_id)
                .bind(item.content.kind())
                .bind(content_data)
                .bind(item.scheduled_for)
                .bind(item.priority)
                .bind(item.status.as_str())
                .bind(item.attempts)
                .bind(item.max_attempts)
                .bind(&item.error_message)
                .bind(item.posted_at)
                .bind(item.created_at)
                .bind(item.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| crate::error::DbError::BulkAborted {
                    inserted,
                    source: e,
                })?;
            }

            tx.commit()
                .await
                .map_err(|e| crate::error::DbError::BulkAborted {
                    inserted,
                    source: e,
                })?;
            inserted += chunk.len();
        }

        Ok(inserted)
    }

    /// Get a queue item by ID
    pub async fn get_item(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, account_id, content_data, scheduled_for, priority,
                   status, attempts, max_attempts, error_message, posted_at,
                   created_at, updated_at
            FROM posting_queue WHERE id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        match row {
            Some(r) => Ok(Some(item_from_row(&r)?)),
            None => Ok(None),
        }
    }

    /// Read the batch of due items, oldest schedule first, priority and
    /// insertion order breaking ties. Reads only; the rows stay in their
    /// current status until the processor marks them.
    pub async fn claim_due(&self, now: i64, limit: i64) -> Result<Vec<ClaimedItem>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT q.id, q.user_id, q.account_id, q.content_data, q.scheduled_for,
                   q.priority, q.status, q.attempts, q.max_attempts, q.error_message,
                   q.posted_at, q.created_at, q.updated_at,
                   a.id AS acct_id, a.user_id AS acct_user_id,
                   a.platform AS acct_platform, a.username AS acct_username,
                   a.status AS acct_status, a.device_id AS acct_device_id,
                   a.profile_keys AS acct_profile_keys
            FROM posting_queue q
            LEFT JOIN social_accounts a ON a.id = q.account_id
            WHERE q.status IN ('pending', 'rate_limited') AND q.scheduled_for <= ?
            ORDER BY q.scheduled_for ASC, q.priority ASC, q.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for r in &rows {
            let item = item_from_row(r)?;
            let account = match r.get::<Option<String>, _>("acct_id") {
                Some(acct_id) => account_from_parts(
                    acct_id,
                    r.get("acct_user_id"),
                    &r.get::<String, _>("acct_platform"),
                    r.get("acct_username"),
                    &r.get::<String, _>("acct_status"),
                    r.get("acct_device_id"),
                    r.get("acct_profile_keys"),
                ),
                None => None,
            };
            claimed.push(ClaimedItem { item, account });
        }

        Ok(claimed)
    }

    /// Mark an item as being processed right now.
    pub async fn mark_processing(&self, item_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue SET status = 'processing', updated_at = ? WHERE id = ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Mark an item posted, recording the completion time and clearing any
    /// error left over from earlier attempts.
    pub async fn mark_posted(&self, item_id: &str, posted_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'posted', posted_at = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(posted_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Push an item back to the rate-limited state with a new due time.
    /// Attempts are untouched; a throttle decision is not a failure.
    pub async fn mark_rate_limited(&self, item_id: &str, resume_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'rate_limited', scheduled_for = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(resume_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Return a failed item to pending for another attempt at `resume_at`.
    pub async fn mark_retry(
        &self,
        item_id: &str,
        attempts: i64,
        resume_at: i64,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'pending', attempts = ?, scheduled_for = ?,
                error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(resume_at)
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Mark an item permanently failed.
    pub async fn mark_failed(&self, item_id: &str, attempts: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'failed', attempts = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Move a pending item to a different due time.
    pub async fn update_scheduled_for(&self, item_id: &str, scheduled_for: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue SET scheduled_for = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(scheduled_for)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Cancel one non-terminal item. Returns false when the item does not
    /// exist, belongs to someone else, or already reached a terminal state.
    pub async fn cancel_item(&self, item_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posting_queue SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND user_id = ?
              AND status IN ('pending', 'processing', 'rate_limited')
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel every waiting item for a tenant that matches the filter.
    /// Items currently processing are left alone. Returns the number of
    /// items cancelled.
    pub async fn cancel_items(&self, user_id: &str, filter: &CancelFilter) -> Result<u64> {
        // Build the WHERE clause dynamically
        let mut where_clauses = vec!["user_id = ?", "status IN ('pending', 'rate_limited')"];

        if filter.account_id.is_some() {
            where_clauses.push("account_id = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("account_id IN (SELECT id FROM social_accounts WHERE platform = ?)");
        }
        if filter.before.is_some() {
            where_clauses.push("scheduled_for <= ?");
        }

        let query_str = format!(
            "UPDATE posting_queue SET status = 'cancelled', updated_at = ? WHERE {}",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str)
            .bind(chrono::Utc::now().timestamp())
            .bind(user_id);

        // Bind parameters in the same order as WHERE clauses
        if let Some(account_id) = &filter.account_id {
            query = query.bind(account_id);
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(before) = filter.before {
            query = query.bind(before);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// List queue items, soonest due first.
    pub async fn list_items(
        &self,
        user_id: Option<&str>,
        status: Option<QueueStatus>,
        account_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<QueueItem>> {
        let mut where_clauses = vec!["1=1"];

        if user_id.is_some() {
            where_clauses.push("user_id = ?");
        }
        if status.is_some() {
            where_clauses.push("status = ?");
        }
        if account_id.is_some() {
            where_clauses.push("account_id = ?");
        }

        let query_str = format!(
            r#"
            SELECT id, user_id, account_id, content_data, scheduled_for, priority,
                   status, attempts, max_attempts, error_message, posted_at,
                   created_at, updated_at
            FROM posting_queue
            WHERE {}
            ORDER BY scheduled_for ASC
            LIMIT ?
            "#,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(user) = user_id {
            query = query.bind(user);
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(account) = account_id {
            query = query.bind(account);
        }
        query = query.bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        let mut items = Vec::with_capacity(rows.len());
        for r in &rows {
            items.push(item_from_row(r)?);
        }

        Ok(items)
    }

    /// Upcoming (pending or rate-limited) items for a tenant, soonest
    /// first, each with its account for display. `until` bounds the due
    /// time from above.
    pub async fn list_scheduled(
        &self,
        user_id: &str,
        account_id: Option<&str>,
        until: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ClaimedItem>> {
        use sqlx::Row;

        let mut where_clauses = vec![
            "q.user_id = ?",
            "q.status IN ('pending', 'rate_limited')",
        ];
        if account_id.is_some() {
            where_clauses.push("q.account_id = ?");
        }
        if until.is_some() {
            where_clauses.push("q.scheduled_for <= ?");
        }

        let query_str = format!(
            r#"
            SELECT q.id, q.user_id, q.account_id, q.content_data, q.scheduled_for,
                   q.priority, q.status, q.attempts, q.max_attempts, q.error_message,
                   q.posted_at, q.created_at, q.updated_at,
                   a.id AS acct_id, a.user_id AS acct_user_id,
                   a.platform AS acct_platform, a.username AS acct_username,
                   a.status AS acct_status, a.device_id AS acct_device_id,
                   a.profile_keys AS acct_profile_keys
            FROM posting_queue q
            LEFT JOIN social_accounts a ON a.id = q.account_id
            WHERE {}
            ORDER BY q.scheduled_for ASC
            LIMIT ?
            "#,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str).bind(user_id);
        if let Some(account) = account_id {
            query = query.bind(account);
        }
        if let Some(until) = until {
            query = query.bind(until);
        }
        query = query.bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        let mut scheduled = Vec::with_capacity(rows.len());
        for r in &rows {
            let item = item_from_row(r)?;
            let account = match r.get::<Option<String>, _>("acct_id") {
                Some(acct_id) => account_from_parts(
                    acct_id,
                    r.get("acct_user_id"),
                    &r.get::<String, _>("acct_platform"),
                    r.get("acct_username"),
                    &r.get::<String, _>("acct_status"),
                    r.get("acct_device_id"),
                    r.get("acct_profile_keys"),
                ),
                None => None,
            };
            scheduled.push(ClaimedItem { item, account });
        }

        Ok(scheduled)
    }

    /// Pending items for one account, soonest due first. Used when
    /// redistributing an account's schedule.
    pub async fn pending_for_account(&self, account_id: &str) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, account_id, content_data, scheduled_for, priority,
                   status, attempts, max_attempts, error_message, posted_at,
                   created_at, updated_at
            FROM posting_queue
            WHERE account_id = ? AND status = 'pending'
            ORDER BY scheduled_for ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        let mut items = Vec::with_capacity(rows.len());
        for r in &rows {
            items.push(item_from_row(r)?);
        }

        Ok(items)
    }

    /// Per-status counts, optionally scoped to one tenant.
    pub async fn status_counts(&self, user_id: Option<&str>) -> Result<QueueStats> {
        use sqlx::Row;

        let query_str = if user_id.is_some() {
            "SELECT status, COUNT(*) AS n FROM posting_queue WHERE user_id = ? GROUP BY status"
        } else {
            "SELECT status, COUNT(*) AS n FROM posting_queue GROUP BY status"
        };

        let mut query = sqlx::query(query_str);
        if let Some(user) = user_id {
            query = query.bind(user);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for r in &rows {
            let n: i64 = r.get("n");
            match QueueStatus::from_db(&r.get::<String, _>("status")) {
                QueueStatus::Pending => stats.pending += n,
                QueueStatus::Processing => stats.processing += n,
                QueueStatus::Posted => stats.posted += n,
                QueueStatus::Failed => stats.failed += n,
                QueueStatus::RateLimited => stats.rate_limited += n,
                QueueStatus::Cancelled => stats.cancelled += n,
            }
            stats.total += n;
        }

        Ok(stats)
    }

    /// Latest pending due time for an account, used to chain drip spacing
    /// onto the end of what is already queued.
    pub async fn last_scheduled_for(&self, account_id: &str) -> Result<Option<i64>> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT MAX(scheduled_for) AS last
            FROM posting_queue
            WHERE account_id = ? AND status IN ('pending', 'rate_limited')
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.get("last"))
    }

    /// Posted-row count for one account and action kind since a cutoff.
    /// This is the trailing-window side of rate limiting.
    pub async fn count_posted_since(
        &self,
        account_id: &str,
        content_type: &str,
        since: i64,
    ) -> Result<i64> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM posting_queue
            WHERE account_id = ? AND content_type = ?
              AND status = 'posted' AND posted_at >= ?
            "#,
        )
        .bind(account_id)
        .bind(content_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.get("n"))
    }

    /// Most recent completion time for one account and action kind.
    pub async fn last_posted_at(
        &self,
        account_id: &str,
        content_type: &str,
    ) -> Result<Option<i64>> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT MAX(posted_at) AS last
            FROM posting_queue
            WHERE account_id = ? AND content_type = ? AND status = 'posted'
            "#,
        )
        .bind(account_id)
        .bind(content_type)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.get("last"))
    }

    /// Insert or replace a social account row.
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        let profile_keys =
            serde_json::to_string(&account.profile_keys).map_err(crate::error::DbError::Encoding)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO social_accounts
                (id, user_id, platform, username, status, device_id, profile_keys)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.username)
        .bind(account.status.as_str())
        .bind(&account.device_id)
        .bind(&profile_keys)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Get an account by ID. Returns `None` for rows that cannot be
    /// decoded, such as an unknown platform string.
    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, username, status, device_id, profile_keys
            FROM social_accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.and_then(|r| account_row(&r)))
    }

    /// Fetch a specific set of accounts. IDs that do not exist are simply
    /// absent from the result.
    pub async fn accounts_by_ids(&self, ids: &[String]) -> Result<Vec<Account>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let query_str = format!(
            r#"
            SELECT id, user_id, platform, username, status, device_id, profile_keys
            FROM social_accounts WHERE id IN ({}) ORDER BY id ASC
            "#,
            placeholders
        );

        let mut query = sqlx::query(&query_str);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().filter_map(account_row).collect())
    }

    /// All active accounts for a tenant, in stable ID order.
    pub async fn active_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, username, status, device_id, profile_keys
            FROM social_accounts
            WHERE user_id = ? AND status = 'active'
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().filter_map(account_row).collect())
    }

    /// Look up the throttle rule for a platform and action kind.
    pub async fn rate_limit_rule(
        &self,
        platform: Platform,
        action_type: &str,
    ) -> Result<Option<RateLimitRule>> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT platform, action_type, max_per_hour, max_per_day, cooldown_seconds
            FROM rate_limits WHERE platform = ? AND action_type = ?
            "#,
        )
        .bind(platform.as_str())
        .bind(action_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| RateLimitRule {
            platform,
            action_type: r.get("action_type"),
            max_per_hour: r.get("max_per_hour"),
            max_per_day: r.get("max_per_day"),
            cooldown_seconds: r.get("cooldown_seconds"),
        }))
    }

    /// Insert or replace a throttle rule.
    pub async fn upsert_rate_limit_rule(&self, rule: &RateLimitRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO rate_limits
                (platform, action_type, max_per_hour, max_per_day, cooldown_seconds)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(rule.platform.as_str())
        .bind(&rule.action_type)
        .bind(rule.max_per_hour)
        .bind(rule.max_per_day)
        .bind(rule.cooldown_seconds)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Add an entry to the content pool.
    pub async fn insert_content(&self, entry: &ContentEntry) -> Result<()> {
        let posted_to = serde_json::to_string(&entry.posted_to_accounts)
            .map_err(crate::error::DbError::Encoding)?;
        let used = if entry.used { 1 } else { 0 };

        sqlx::query(
            r#"
            INSERT INTO content_pool
                (id, user_id, body, quality_score, used, posted_to_accounts, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.body)
        .bind(entry.quality_score)
        .bind(used)
        .bind(&posted_to)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Unused content for a tenant, best quality first.
    pub async fn unused_content(&self, user_id: &str, limit: i64) -> Result<Vec<ContentEntry>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, body, quality_score, used, posted_to_accounts, created_at
            FROM content_pool
            WHERE user_id = ? AND used = 0
            ORDER BY quality_score DESC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ContentEntry {
                id: r.get("id"),
                user_id: r.get("user_id"),
                body: r.get("body"),
                quality_score: r.get("quality_score"),
                used: r.get::<i64, _>("used") != 0,
                posted_to_accounts: decode_posted_to(r.get("posted_to_accounts")),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Mark a pool entry consumed and record which account it went to.
    pub async fn mark_content_used(&self, content_id: &str, account_id: &str) -> Result<()> {
        use sqlx::Row;

        let row = sqlx::query("SELECT posted_to_accounts FROM content_pool WHERE id = ?")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        let mut posted_to = match row {
            Some(r) => decode_posted_to(r.get("posted_to_accounts")),
            None => return Ok(()),
        };
        posted_to.push(account_id.to_string());
        let encoded =
            serde_json::to_string(&posted_to).map_err(crate::error::DbError::Encoding)?;

        sqlx::query("UPDATE content_pool SET used = 1, posted_to_accounts = ? WHERE id = ?")
            .bind(&encoded)
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }
}

fn item_from_row(r: &SqliteRow) -> Result<QueueItem> {
    use sqlx::Row;

    let content_data: String = r.get("content_data");
    let content = serde_json::from_str(&content_data).map_err(crate::error::DbError::Encoding)?;

    Ok(QueueItem {
        id: r.get("id"),
        user_id: r.get("user_id"),
        account_id: r.get("account_id"),
        content,
        scheduled_for: r.get("scheduled_for"),
        priority: r.get("priority"),
        status: QueueStatus::from_db(&r.get::<String, _>("status")),
        attempts: r.get("attempts"),
        max_attempts: r.get("max_attempts"),
        error_message: r.get("error_message"),
        posted_at: r.get("posted_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn account_row(r: &SqliteRow) -> Option<Account> {
    use sqlx::Row;

    account_from_parts(
        r.get("id"),
        r.get("user_id"),
        &r.get::<String, _>("platform"),
        r.get("username"),
        &r.get::<String, _>("status"),
        r.get("device_id"),
        r.get("profile_keys"),
    )
}

/// Assemble an account from raw column values. Returns `None` when the
/// platform string is unrecognized; such rows must not receive work.
/// Unknown platforms inside `profile_keys` are dropped rather than
/// rejected, so a newer writer cannot break an older reader.
fn account_from_parts(
    id: String,
    user_id: String,
    platform: &str,
    username: String,
    status: &str,
    device_id: Option<String>,
    profile_keys_json: Option<String>,
) -> Option<Account> {
    let platform = match platform.parse::<Platform>() {
        Ok(p) => p,
        Err(_) => {
            tracing::warn!(account_id = %id, platform, "Skipping account with unknown platform");
            return None;
        }
    };

    let raw_keys: HashMap<String, String> = match &profile_keys_json {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!(account_id = %id, error = %e, "Malformed profile_keys, treating as empty");
            HashMap::new()
        }),
        None => HashMap::new(),
    };
    let mut profile_keys = HashMap::new();
    for (key, value) in raw_keys {
        if let Ok(p) = key.parse::<Platform>() {
            profile_keys.insert(p, value);
        }
    }

    Some(Account {
        id,
        user_id,
        platform,
        username,
        status: AccountStatus::from_db(status),
        device_id,
        profile_keys,
    })
}

fn decode_posted_to(raw: Option<String>) -> Vec<String> {
    match raw {
        Some(json) => serde_json::from_str(&json).unwrap_or_default(),
        None => Vec::new(),
    }
}
