//! Demo of one queue processing pass against mock backends
//!
//! Seeds a throwaway database with an account and a few due posts, then
//! runs a single tick. No network access and no config file needed.
//!
//! Usage:
//!   cargo run --example process_once

use libdripcast::config::QueueConfig;
use libdripcast::mock::{MockDeviceDriver, MockPostClient};
use libdripcast::types::{AccountStatus, EnqueueOptions};
use libdripcast::{
    Account, Content, Database, Dispatcher, Platform, QueueItem, QueueProcessor, TickOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::TempDir::new()?;
    let db_path = temp_dir.path().join("demo.db");
    let db = Database::new(&db_path.to_string_lossy()).await?;

    println!("=== Seeding ===\n");

    let mut profile_keys = HashMap::new();
    profile_keys.insert(Platform::Twitter, "demo-profile-key".to_string());
    db.upsert_account(&Account {
        id: "demo-account".to_string(),
        user_id: "default".to_string(),
        platform: Platform::Twitter,
        username: "demo".to_string(),
        status: AccountStatus::Active,
        device_id: None,
        profile_keys,
    })
    .await?;

    let now = chrono::Utc::now().timestamp();
    for (offset, text) in [(-60, "First due post"), (-30, "Second due post")] {
        let item = QueueItem::new(
            "default",
            "demo-account",
            Content::text_post(text),
            EnqueueOptions {
                scheduled_for: Some(now + offset),
                ..EnqueueOptions::default()
            },
        );
        db.insert_item(&item).await?;
        println!("queued {} | {}", item.id, text);
    }

    // One item scheduled for tomorrow, to show it is left alone
    let later = QueueItem::new(
        "default",
        "demo-account",
        Content::text_post("Tomorrow's post"),
        EnqueueOptions {
            scheduled_for: Some(now + 86_400),
            ..EnqueueOptions::default()
        },
    );
    db.insert_item(&later).await?;
    println!("queued {} | Tomorrow's post (not yet due)", later.id);

    println!("\n=== Processing ===\n");

    let post_client = MockPostClient::success();
    let device = MockDeviceDriver::success();
    let dispatcher = Dispatcher::new(Arc::new(post_client.clone()), Arc::new(device.clone()));
    let processor = QueueProcessor::new(
        db.clone(),
        dispatcher,
        &QueueConfig {
            poll_interval: 60,
            batch_size: 100,
            inter_item_delay_ms: 0,
        },
    );

    match processor.tick().await? {
        TickOutcome::Completed(summary) => println!("{}", summary),
        TickOutcome::AlreadyRunning => println!("another pass was already running"),
    }

    println!("\n=== Dispatched requests ===\n");
    for single in post_client.recorded_singles() {
        println!(
            "{} via {} | {}",
            single.platform, single.profile_key, single.caption
        );
    }

    println!("\n=== Queue after the pass ===\n");
    let stats = db.status_counts(Some("default")).await?;
    println!("pending: {}", stats.pending);
    println!("posted:  {}", stats.posted);

    Ok(())
}
