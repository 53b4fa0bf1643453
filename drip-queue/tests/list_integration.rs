//! Integration tests for drip-queue list command

use assert_cmd::Command;
use libdripcast::types::{AccountStatus, EnqueueOptions};
use libdripcast::{Account, Content, Database, Platform, QueueItem};
use predicates::prelude::*;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

/// Setup test environment with config and database
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("queue.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[queue]
poll_interval = 60
batch_size = 100
inter_item_delay_ms = 0
"#,
        db_path.display().to_string().replace('\\', "/")
    );

    fs::write(&config_path, config_content).unwrap();

    // Initialize database
    let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

/// Create an active account owned by the default CLI user
async fn seed_account(db_path: &str, id: &str) {
    let db = Database::new(db_path).await.unwrap();
    let mut profile_keys = HashMap::new();
    profile_keys.insert(Platform::Twitter, format!("{}-key", id));

    db.upsert_account(&Account {
        id: id.to_string(),
        user_id: "default".to_string(),
        platform: Platform::Twitter,
        username: format!("{}-name", id),
        status: AccountStatus::Active,
        device_id: None,
        profile_keys,
    })
    .await
    .unwrap();
}

/// Queue one pending item due at the given offset from now
async fn seed_item(db_path: &str, account_id: &str, text: &str, offset_secs: i64) -> String {
    let db = Database::new(db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let item = QueueItem::new(
        "default",
        account_id,
        Content::text_post(text),
        EnqueueOptions {
            scheduled_for: Some(now + offset_secs),
            ..EnqueueOptions::default()
        },
    );

    let id = item.id.clone();
    db.insert_item(&item).await.unwrap();
    id
}

// BASIC LIST TESTS

#[tokio::test]
async fn test_list_empty_queue_prints_nothing() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn test_list_shows_item_with_account_context() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    let id = seed_item(&db_path, "acct-1", "morning post", 3600).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("acct-1-name@twitter"))
        .stdout(predicate::str::contains("morning post"));
}

#[tokio::test]
async fn test_list_orders_by_due_time() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_item(&db_path, "acct-1", "second", 7200).await;
    seed_item(&db_path, "acct-1", "first", 3600).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    let output = cmd
        .env("DRIPCAST_CONFIG", &config_path)
        .arg("list")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let first_pos = stdout.find("first").unwrap();
    let second_pos = stdout.find("second").unwrap();
    assert!(first_pos < second_pos);
}

#[tokio::test]
async fn test_list_filters_by_account() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_account(&db_path, "acct-2").await;
    seed_item(&db_path, "acct-1", "mine", 3600).await;
    seed_item(&db_path, "acct-2", "other", 3600).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--account", "acct-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mine"))
        .stdout(predicate::str::contains("other").not());
}

#[tokio::test]
async fn test_list_until_bounds_due_time() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_item(&db_path, "acct-1", "soon", 3600).await;
    seed_item(&db_path, "acct-1", "next week", 7 * 86_400).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--until", "24h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("soon"))
        .stdout(predicate::str::contains("next week").not());
}

#[tokio::test]
async fn test_list_excludes_posted_items_by_default() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_item(&db_path, "acct-1", "waiting", 3600).await;
    let posted = seed_item(&db_path, "acct-1", "already out", -3600).await;

    let db = Database::new(&db_path).await.unwrap();
    db.mark_posted(&posted, chrono::Utc::now().timestamp())
        .await
        .unwrap();

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("waiting"))
        .stdout(predicate::str::contains("already out").not());
}

// STATUS FILTER TESTS

#[tokio::test]
async fn test_list_status_filter_shows_posted() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_item(&db_path, "acct-1", "waiting", 3600).await;
    let posted = seed_item(&db_path, "acct-1", "already out", -3600).await;

    let db = Database::new(&db_path).await.unwrap();
    db.mark_posted(&posted, chrono::Utc::now().timestamp())
        .await
        .unwrap();

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--status", "posted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already out"))
        .stdout(predicate::str::contains("waiting").not());
}

#[tokio::test]
async fn test_list_rejects_unknown_status() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--status", "sleeping"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid status"));
}

// JSON FORMAT TESTS

#[tokio::test]
async fn test_list_json_format() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;
    seed_item(&db_path, "acct-1", "json me", 3600).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["))
        .stdout(predicate::str::contains("\"username\""))
        .stdout(predicate::str::contains("\"scheduled_for\""))
        .stdout(predicate::str::contains("json me"));
}

#[tokio::test]
async fn test_list_json_orphan_account_is_null() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_item(&db_path, "vanished", "orphan", 3600).await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"account\": null"));
}

#[tokio::test]
async fn test_list_rejects_invalid_format() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .args(["list", "--format", "yaml"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

// TENANT SCOPE TESTS

#[tokio::test]
async fn test_list_scopes_to_user() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    seed_account(&db_path, "acct-1").await;

    let db = Database::new(&db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();
    let theirs = QueueItem::new(
        "someone-else",
        "acct-1",
        Content::text_post("not yours"),
        EnqueueOptions {
            scheduled_for: Some(now + 3600),
            ..EnqueueOptions::default()
        },
    );
    db.insert_item(&theirs).await.unwrap();

    let mut cmd = Command::cargo_bin("drip-queue").unwrap();

    cmd.env("DRIPCAST_CONFIG", &config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
