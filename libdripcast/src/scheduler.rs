//! Bulk schedule planning
//!
//! Spreads unused content entries across many accounts at randomized
//! posting times and enqueues the result in one pass. Slot planning is
//! pure and takes the RNG as a parameter; persistence happens only after
//! the whole plan is built.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{DripcastError, Result};
use crate::types::{Account, Content, ContentEntry, EnqueueOptions, QueueItem};

/// Posting hours that historically draw the most engagement, cycled in
/// order. After a full pass the working day advances.
const OPTIMAL_HOURS: [i64; 5] = [9, 12, 15, 18, 21];
/// Random slop applied to every slot, in seconds either way.
const JITTER_SECS: i64 = 1800;
const DAY_SECS: i64 = 86_400;

/// What to schedule and how to spread it.
#[derive(Debug, Clone)]
pub struct BulkScheduleRequest {
    pub user_id: String,
    pub account_ids: Vec<String>,
    pub items_per_account: usize,
    /// Unix seconds; the working day is the UTC day containing this.
    pub start: i64,
    /// Stop scheduling for an account once its working day passes this.
    pub end: Option<i64>,
    /// Cycle through engagement-optimal hours instead of uniform times.
    pub use_optimal_times: bool,
    /// Shuffle the content pool before assignment.
    pub randomize: bool,
}

/// Outcome of a bulk scheduling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkScheduleSummary {
    pub accounts: usize,
    pub items_per_account: usize,
    pub total_queued: usize,
    pub first_scheduled: Option<i64>,
    pub last_scheduled: Option<i64>,
}

/// One planned queue entry, before persistence.
#[derive(Debug, Clone)]
struct PlannedSlot {
    account_id: String,
    content_id: String,
    body: String,
    scheduled_for: i64,
}

/// Plans and enqueues posting schedules.
pub struct BulkScheduler {
    db: Database,
}

impl BulkScheduler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Spread unused content across the requested accounts and enqueue it.
    ///
    /// Content is drawn from the pool without replacement, best quality
    /// first (shuffled when `randomize` is set). A pool smaller than
    /// `accounts * items_per_account` is not an error; scheduling stops
    /// early with a warning. An empty pool is rejected before anything is
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the request cannot produce any items,
    /// and database errors from the bulk insert.
    pub async fn schedule(&self, request: &BulkScheduleRequest) -> Result<BulkScheduleSummary> {
        if request.items_per_account == 0 {
            return Err(DripcastError::InvalidInput(
                "items per account must be at least 1".to_string(),
            ));
        }

        let accounts = self.db.accounts_by_ids(&request.account_ids).await?;
        let active: Vec<Account> = accounts.into_iter().filter(|a| a.is_active()).collect();
        if active.is_empty() {
            return Err(DripcastError::InvalidInput(
                "no active accounts among the requested ids".to_string(),
            ));
        }

        let want = active.len() * request.items_per_account;
        let mut pool = self.db.unused_content(&request.user_id, want as i64).await?;
        if pool.is_empty() {
            return Err(DripcastError::InvalidInput(
                "no unused content available, add content first".to_string(),
            ));
        }
        if pool.len() < want {
            warn!(
                available = pool.len(),
                want, "Content pool smaller than requested, scheduling will stop early"
            );
        }

        let mut rng = rand::thread_rng();
        if request.randomize {
            pool.shuffle(&mut rng);
        }

        info!(
            accounts = active.len(),
            items_per_account = request.items_per_account,
            pool = pool.len(),
            "Planning bulk schedule"
        );
        let slots = build_schedule(&active, &pool, request, &mut rng);

        let items: Vec<QueueItem> = slots
            .iter()
            .map(|slot| {
                QueueItem::new(
                    &request.user_id,
                    &slot.account_id,
                    Content::Post {
                        text: slot.body.clone(),
                        media_url: None,
                        variation_id: Some(slot.content_id.clone()),
                    },
                    EnqueueOptions {
                        scheduled_for: Some(slot.scheduled_for),
                        ..EnqueueOptions::default()
                    },
                )
            })
            .collect();

        let total_queued = self.db.bulk_insert_items(&items).await?;

        for slot in &slots {
            self.db
                .mark_content_used(&slot.content_id, &slot.account_id)
                .await?;
        }

        let summary = BulkScheduleSummary {
            accounts: active.len(),
            items_per_account: request.items_per_account,
            total_queued,
            first_scheduled: slots.first().map(|s| s.scheduled_for),
            last_scheduled: slots.last().map(|s| s.scheduled_for),
        };
        info!(
            queued = summary.total_queued,
            accounts = summary.accounts,
            "Bulk schedule queued"
        );
        Ok(summary)
    }

    /// Re-spread an account's still-pending items from a new start time
    /// using the optimal-hour cycle. Returns how many items moved.
    pub async fn reschedule_account(&self, account_id: &str, new_start: i64) -> Result<usize> {
        let pending = self.db.pending_for_account(account_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut rng = rand::thread_rng();
        let times = respread(pending.len(), new_start, &mut rng);
        for (item, at) in pending.iter().zip(&times) {
            self.db.update_scheduled_for(&item.id, *at).await?;
        }

        info!(
            account_id,
            moved = pending.len(),
            "Rescheduled pending items"
        );
        Ok(pending.len())
    }
}

/// Midnight UTC of the day containing `ts`.
fn day_floor(ts: i64) -> i64 {
    ts - ts.rem_euclid(DAY_SECS)
}

fn optimal_slot<R: Rng>(day_start: i64, index: usize, rng: &mut R) -> i64 {
    let hour = OPTIMAL_HOURS[index % OPTIMAL_HOURS.len()];
    day_start + hour * 3600 + rng.gen_range(0..60) * 60
}

fn jitter<R: Rng>(ts: i64, rng: &mut R) -> i64 {
    ts + rng.gen_range(-JITTER_SECS..=JITTER_SECS)
}

/// Assign pool entries to accounts at computed times, sorted soonest
/// first. Content is consumed globally, so no entry is assigned twice.
/// Each account's day cursor starts on the day of `request.start` and
/// advances after every full pass through the hour cycle.
fn build_schedule<R: Rng>(
    accounts: &[Account],
    pool: &[ContentEntry],
    request: &BulkScheduleRequest,
    rng: &mut R,
) -> Vec<PlannedSlot> {
    let mut slots = Vec::new();
    let mut content_index = 0;

    'accounts: for account in accounts {
        let mut day_start = day_floor(request.start);

        for index in 0..request.items_per_account {
            let Some(entry) = pool.get(content_index) else {
                warn!(planned = slots.len(), "Content pool exhausted");
                break 'accounts;
            };

            let base = if request.use_optimal_times {
                optimal_slot(day_start, index, rng)
            } else {
                day_start + rng.gen_range(0..DAY_SECS)
            };

            slots.push(PlannedSlot {
                account_id: account.id.clone(),
                content_id: entry.id.clone(),
                body: entry.body.clone(),
                scheduled_for: jitter(base, rng),
            });
            content_index += 1;

            if (index + 1) % OPTIMAL_HOURS.len() == 0 {
                day_start += DAY_SECS;
            }
            if let Some(end) = request.end {
                if day_start > end {
                    break;
                }
            }
        }
    }

    slots.sort_by_key(|slot| slot.scheduled_for);
    slots
}

/// New times for `count` items from `start`, following the optimal-hour
/// cycle in order.
fn respread<R: Rng>(count: usize, start: i64, rng: &mut R) -> Vec<i64> {
    let mut times = Vec::with_capacity(count);
    let mut day_start = day_floor(start);

    for index in 0..count {
        times.push(jitter(optimal_slot(day_start, index, rng), rng));
        if (index + 1) % OPTIMAL_HOURS.len() == 0 {
            day_start += DAY_SECS;
        }
    }

    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountStatus, Platform, QueueStatus};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    // 2024-01-15 00:00:00 UTC
    const DAY0: i64 = 1_705_276_800;

    fn test_account(id: &str, status: AccountStatus) -> Account {
        Account {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            platform: Platform::Twitter,
            username: format!("{}-user", id),
            status,
            device_id: None,
            profile_keys: HashMap::from([(Platform::Twitter, format!("{}-key", id))]),
        }
    }

    fn test_pool(n: usize) -> Vec<ContentEntry> {
        (0..n)
            .map(|i| {
                let mut entry =
                    ContentEntry::new("user-1", &format!("variation {}", i), 1.0 - i as f64 * 0.01);
                entry.id = format!("content-{}", i);
                entry
            })
            .collect()
    }

    fn test_request(account_ids: &[&str], items_per_account: usize) -> BulkScheduleRequest {
        BulkScheduleRequest {
            user_id: "user-1".to_string(),
            account_ids: account_ids.iter().map(|s| s.to_string()).collect(),
            items_per_account,
            start: DAY0 + 6 * 3600,
            end: None,
            use_optimal_times: true,
            randomize: false,
        }
    }

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (temp_dir, db)
    }

    #[test]
    fn test_day_floor() {
        assert_eq!(day_floor(DAY0), DAY0);
        assert_eq!(day_floor(DAY0 + 1), DAY0);
        assert_eq!(day_floor(DAY0 + DAY_SECS - 1), DAY0);
        assert_eq!(day_floor(DAY0 + DAY_SECS), DAY0 + DAY_SECS);
        // Pre-epoch timestamps still floor downward.
        assert_eq!(day_floor(-1), -DAY_SECS);
    }

    #[test]
    fn test_build_schedule_pairs_without_replacement() {
        let accounts = vec![
            test_account("a1", AccountStatus::Active),
            test_account("a2", AccountStatus::Active),
        ];
        let pool = test_pool(6);
        let request = test_request(&["a1", "a2"], 3);
        let mut rng = StdRng::seed_from_u64(42);

        let slots = build_schedule(&accounts, &pool, &request, &mut rng);

        assert_eq!(slots.len(), 6);
        let content_ids: HashSet<_> = slots.iter().map(|s| s.content_id.as_str()).collect();
        assert_eq!(content_ids.len(), 6);
        for id in ["a1", "a2"] {
            assert_eq!(slots.iter().filter(|s| s.account_id == id).count(), 3);
        }
    }

    #[test]
    fn test_build_schedule_optimal_hour_cycle() {
        let accounts = vec![test_account("a1", AccountStatus::Active)];
        let pool = test_pool(7);
        let request = test_request(&["a1"], 7);
        let mut rng = StdRng::seed_from_u64(7);

        let mut slots = build_schedule(&accounts, &pool, &request, &mut rng);
        // Recover assignment order: content was consumed sequentially.
        slots.sort_by(|a, b| a.content_id.cmp(&b.content_id));

        for (index, slot) in slots.iter().enumerate() {
            let day = DAY0 + (index as i64 / 5) * DAY_SECS;
            let hour = OPTIMAL_HOURS[index % 5];
            let earliest = day + hour * 3600 - JITTER_SECS;
            let latest = day + hour * 3600 + 59 * 60 + JITTER_SECS;
            assert!(
                slot.scheduled_for >= earliest && slot.scheduled_for <= latest,
                "Slot {} at {} outside [{}, {}]",
                index,
                slot.scheduled_for,
                earliest,
                latest
            );
        }
    }

    #[test]
    fn test_build_schedule_uniform_times_stay_in_day() {
        let accounts = vec![test_account("a1", AccountStatus::Active)];
        let pool = test_pool(5);
        let mut request = test_request(&["a1"], 5);
        request.use_optimal_times = false;
        let mut rng = StdRng::seed_from_u64(3);

        let slots = build_schedule(&accounts, &pool, &request, &mut rng);

        assert_eq!(slots.len(), 5);
        for slot in &slots {
            assert!(slot.scheduled_for >= DAY0 - JITTER_SECS);
            assert!(slot.scheduled_for <= DAY0 + DAY_SECS + JITTER_SECS);
        }
    }

    #[test]
    fn test_build_schedule_end_bound_stops_account() {
        let accounts = vec![test_account("a1", AccountStatus::Active)];
        let pool = test_pool(20);
        let mut request = test_request(&["a1"], 20);
        // Only the starting day is allowed: one full hour cycle.
        request.end = Some(DAY0 + DAY_SECS - 1);
        let mut rng = StdRng::seed_from_u64(11);

        let slots = build_schedule(&accounts, &pool, &request, &mut rng);
        assert_eq!(slots.len(), OPTIMAL_HOURS.len());
    }

    #[test]
    fn test_build_schedule_stops_when_pool_exhausted() {
        let accounts = vec![
            test_account("a1", AccountStatus::Active),
            test_account("a2", AccountStatus::Active),
        ];
        let pool = test_pool(3);
        let request = test_request(&["a1", "a2"], 5);
        let mut rng = StdRng::seed_from_u64(5);

        let slots = build_schedule(&accounts, &pool, &request, &mut rng);

        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.account_id == "a1"));
    }

    #[test]
    fn test_build_schedule_sorted_ascending() {
        let accounts = vec![
            test_account("a1", AccountStatus::Active),
            test_account("a2", AccountStatus::Active),
        ];
        let pool = test_pool(10);
        let request = test_request(&["a1", "a2"], 5);
        let mut rng = StdRng::seed_from_u64(9);

        let slots = build_schedule(&accounts, &pool, &request, &mut rng);
        for pair in slots.windows(2) {
            assert!(pair[0].scheduled_for <= pair[1].scheduled_for);
        }
    }

    #[test]
    fn test_build_schedule_deterministic_with_seed() {
        let accounts = vec![test_account("a1", AccountStatus::Active)];
        let pool = test_pool(5);
        let request = test_request(&["a1"], 5);

        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);
        let a = build_schedule(&accounts, &pool, &request, &mut rng_a);
        let b = build_schedule(&accounts, &pool, &request, &mut rng_b);

        let times_a: Vec<i64> = a.iter().map(|s| s.scheduled_for).collect();
        let times_b: Vec<i64> = b.iter().map(|s| s.scheduled_for).collect();
        assert_eq!(times_a, times_b);
    }

    #[test]
    fn test_respread_follows_hour_cycle() {
        let mut rng = StdRng::seed_from_u64(21);
        let times = respread(7, DAY0 + 3600, &mut rng);

        assert_eq!(times.len(), 7);
        for (index, at) in times.iter().enumerate() {
            let day = DAY0 + (index as i64 / 5) * DAY_SECS;
            let hour = OPTIMAL_HOURS[index % 5];
            assert!(*at >= day + hour * 3600 - JITTER_SECS);
            assert!(*at <= day + hour * 3600 + 59 * 60 + JITTER_SECS);
        }
    }

    #[tokio::test]
    async fn test_schedule_persists_and_consumes_content() {
        let (_tmp, db) = setup_test_db().await;
        for id in ["a1", "a2"] {
            db.upsert_account(&test_account(id, AccountStatus::Active))
                .await
                .unwrap();
        }
        for entry in test_pool(4) {
            db.insert_content(&entry).await.unwrap();
        }

        let scheduler = BulkScheduler::new(db.clone());
        let summary = scheduler.schedule(&test_request(&["a1", "a2"], 2)).await.unwrap();

        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.total_queued, 4);
        assert!(summary.first_scheduled.unwrap() <= summary.last_scheduled.unwrap());

        let stats = db.status_counts(Some("user-1")).await.unwrap();
        assert_eq!(stats.pending, 4);

        // The whole pool was consumed.
        let remaining = db.unused_content("user-1", 10).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_items_carry_variation_ids() {
        let (_tmp, db) = setup_test_db().await;
        db.upsert_account(&test_account("a1", AccountStatus::Active))
            .await
            .unwrap();
        for entry in test_pool(2) {
            db.insert_content(&entry).await.unwrap();
        }

        let scheduler = BulkScheduler::new(db.clone());
        scheduler.schedule(&test_request(&["a1"], 2)).await.unwrap();

        let items = db
            .list_items(Some("user-1"), None, None, 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        for item in items {
            match item.content {
                Content::Post { variation_id, .. } => {
                    assert!(variation_id.unwrap().starts_with("content-"));
                }
                other => panic!("Expected post content, got {:?}", other),
            }
            assert_eq!(item.status, QueueStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_schedule_rejects_empty_pool() {
        let (_tmp, db) = setup_test_db().await;
        db.upsert_account(&test_account("a1", AccountStatus::Active))
            .await
            .unwrap();

        let scheduler = BulkScheduler::new(db.clone());
        let result = scheduler.schedule(&test_request(&["a1"], 2)).await;

        assert!(matches!(result, Err(DripcastError::InvalidInput(_))));
        let stats = db.status_counts(None).await.unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn test_schedule_rejects_inactive_accounts() {
        let (_tmp, db) = setup_test_db().await;
        db.upsert_account(&test_account("a1", AccountStatus::Suspended))
            .await
            .unwrap();
        for entry in test_pool(2) {
            db.insert_content(&entry).await.unwrap();
        }

        let scheduler = BulkScheduler::new(db.clone());
        let result = scheduler.schedule(&test_request(&["a1"], 2)).await;
        assert!(matches!(result, Err(DripcastError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_schedule_rejects_zero_items_per_account() {
        let (_tmp, db) = setup_test_db().await;
        let scheduler = BulkScheduler::new(db.clone());
        let result = scheduler.schedule(&test_request(&["a1"], 0)).await;
        assert!(matches!(result, Err(DripcastError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_schedule_partial_pool_queues_what_it_can() {
        let (_tmp, db) = setup_test_db().await;
        for id in ["a1", "a2"] {
            db.upsert_account(&test_account(id, AccountStatus::Active))
                .await
                .unwrap();
        }
        db.insert_content(&test_pool(1)[0]).await.unwrap();

        let scheduler = BulkScheduler::new(db.clone());
        let summary = scheduler.schedule(&test_request(&["a1", "a2"], 3)).await.unwrap();

        assert_eq!(summary.total_queued, 1);
        let stats = db.status_counts(None).await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_reschedule_account_moves_pending_only() {
        let (_tmp, db) = setup_test_db().await;
        db.upsert_account(&test_account("a1", AccountStatus::Active))
            .await
            .unwrap();

        let old = DAY0 - 30 * DAY_SECS;
        let mut ids = Vec::new();
        for i in 0..3 {
            let item = QueueItem::new(
                "user-1",
                "a1",
                Content::text_post(format!("post {}", i)),
                EnqueueOptions {
                    scheduled_for: Some(old + i),
                    ..EnqueueOptions::default()
                },
            );
            db.insert_item(&item).await.unwrap();
            ids.push(item.id);
        }
        // A posted item must not move.
        let done = QueueItem::new(
            "user-1",
            "a1",
            Content::text_post("already out"),
            EnqueueOptions {
                scheduled_for: Some(old),
                ..EnqueueOptions::default()
            },
        );
        db.insert_item(&done).await.unwrap();
        db.mark_posted(&done.id, old + 10).await.unwrap();

        let scheduler = BulkScheduler::new(db.clone());
        let moved = scheduler.reschedule_account("a1", DAY0).await.unwrap();
        assert_eq!(moved, 3);

        for id in &ids {
            let item = db.get_item(id).await.unwrap().unwrap();
            assert!(item.scheduled_for >= DAY0 + 9 * 3600 - JITTER_SECS);
            assert!(item.scheduled_for < DAY0 + DAY_SECS);
        }
        let untouched = db.get_item(&done.id).await.unwrap().unwrap();
        assert_eq!(untouched.scheduled_for, old);
    }

    #[tokio::test]
    async fn test_reschedule_account_with_nothing_pending() {
        let (_tmp, db) = setup_test_db().await;
        let scheduler = BulkScheduler::new(db.clone());
        assert_eq!(scheduler.reschedule_account("a1", DAY0).await.unwrap(), 0);
    }
}
