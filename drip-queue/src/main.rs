//! drip-queue - Manage the posting queue
//!
//! Unix-style tool for inspecting and editing the scheduled posting queue.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libdripcast::config::{generate_default_config, resolve_config_path};
use libdripcast::logging;
use libdripcast::timeparse::parse_when;
use libdripcast::types::{
    CancelFilter, ContentEntry, EnqueueOptions, RateLimitRule, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PRIORITY,
};
use libdripcast::{
    Account, BulkScheduleRequest, BulkScheduler, ClaimedItem, Config, Content, Database,
    DripcastError, Platform, QueueItem, QueueStatus, Result,
};
use serde::Deserialize;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "drip-queue")]
#[command(version)]
#[command(about = "Manage the posting queue")]
#[command(long_about = "\
drip-queue - Manage the posting queue

DESCRIPTION:
    drip-queue is a Unix-style tool for managing the Dripcast posting queue.
    Use it to queue posts, spread content across accounts, inspect upcoming
    work, and cancel what should not go out.

COMMANDS:
    init        Write a starter configuration file
    add         Queue a single post
    bulk        Queue many posts for one account from a JSON file
    schedule    Spread unused content across accounts
    reschedule  Re-spread an account's pending items from a new start
    list        List queued items
    stats       Show queue statistics
    cancel      Cancel queued items
    load        Seed accounts, rate rules, and content from a JSON file

USAGE EXAMPLES:
    # Queue a post for right now
    drip-queue add --account acct-1 \"hello world\"

    # Queue a post half an hour out
    drip-queue add --account acct-1 --schedule 30m \"later\"

    # Drip posts one to four hours apart
    drip-queue add --account acct-1 --schedule random:1h-4h \"drip\"

    # Fill two accounts with ten posts each from the content pool
    drip-queue schedule --accounts acct-1,acct-2 --items-per-account 10

    # See what goes out in the next day
    drip-queue list --until 24h

    # Cancel everything still waiting for one account
    drip-queue cancel --all --account acct-1

CONFIGURATION:
    Configuration file: ~/.config/dripcast/config.toml
    Database location: ~/.local/share/dripcast/queue.db

    Override with environment variables:
        DRIPCAST_CONFIG    - Path to config file
        DRIPCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad item ID, time format, etc.)

For more information, visit: https://github.com/dripcast/dripcast
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Queue a single post
    Add {
        /// Post text
        text: String,

        /// Account ID to post from
        #[arg(short, long)]
        account: String,

        /// When to post (e.g. "now", "30m", "2025-03-01 09:00", "random:1h-4h")
        #[arg(short, long, default_value = "now")]
        schedule: String,

        /// Media URL to attach
        #[arg(long)]
        media_url: Option<String>,

        /// Priority, lower runs first
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: i64,

        /// Attempts before the item is marked failed
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: i64,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Queue many posts for one account from a JSON file
    Bulk {
        /// JSON file: an array of {"text": ..., "media_url": ...} objects
        file: String,

        /// Account ID to post from
        #[arg(short, long)]
        account: String,

        /// When the first post goes out
        #[arg(long, default_value = "now")]
        start: String,

        /// Gap between consecutive posts (e.g. "45m", "2h")
        #[arg(long, default_value = "1h")]
        every: String,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Spread unused content across accounts
    Schedule {
        /// Account IDs to fill (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        accounts: Vec<String>,

        /// Items to queue per account
        #[arg(short = 'n', long, default_value_t = 10)]
        items_per_account: usize,

        /// Schedule start
        #[arg(long, default_value = "now")]
        start: String,

        /// Queue nothing past this time
        #[arg(long)]
        end: Option<String>,

        /// Spread posts uniformly over each day instead of peak hours
        #[arg(long)]
        uniform: bool,

        /// Assign content best-quality-first instead of shuffling
        #[arg(long)]
        no_shuffle: bool,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Re-spread an account's pending items from a new start
    Reschedule {
        /// Account ID whose pending items move
        account: String,

        /// New schedule start (e.g. "now", "2h", "2025-03-01 09:00")
        time: String,
    },

    /// List queued items
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by account ID
        #[arg(short, long)]
        account: Option<String>,

        /// Filter by status (pending, processing, posted, failed, rate_limited, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Only show items due before this time (e.g. "24h")
        #[arg(long)]
        until: Option<String>,

        /// Maximum rows to show
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Cancel queued items
    Cancel {
        /// Item ID to cancel
        item_id: Option<String>,

        /// Cancel every waiting item (narrow with --account/--platform/--before)
        #[arg(long)]
        all: bool,

        /// Only items for this account
        #[arg(long)]
        account: Option<String>,

        /// Only items for accounts on this platform
        #[arg(long)]
        platform: Option<String>,

        /// Only items due before this time
        #[arg(long)]
        before: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,

        /// Owning user ID
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Seed accounts, rate rules, and content from a JSON file
    Load {
        /// JSON file with "accounts", "rate_limits", and "content" arrays
        file: String,

        /// Owning user ID for content entries
        #[arg(long, default_value = "default")]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    logging::init("error", cli.verbose);

    // Run the main logic and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Config generation runs before any config exists
    if let Commands::Init { force } = &cli.command {
        return cmd_init(*force);
    }

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    debug!("Using database at {}", config.database.path);

    // Execute command
    match cli.command {
        Commands::Init { .. } => {}
        Commands::Add {
            text,
            account,
            schedule,
            media_url,
            priority,
            max_attempts,
            user,
        } => {
            cmd_add(
                &db,
                &user,
                &account,
                &text,
                &schedule,
                media_url,
                priority,
                max_attempts,
            )
            .await?;
        }
        Commands::Bulk {
            file,
            account,
            start,
            every,
            user,
        } => {
            cmd_bulk(&db, &user, &account, &file, &start, &every).await?;
        }
        Commands::Schedule {
            accounts,
            items_per_account,
            start,
            end,
            uniform,
            no_shuffle,
            user,
        } => {
            cmd_schedule(
                &db,
                &user,
                accounts,
                items_per_account,
                &start,
                end.as_deref(),
                uniform,
                no_shuffle,
            )
            .await?;
        }
        Commands::Reschedule { account, time } => {
            cmd_reschedule(&db, &account, &time).await?;
        }
        Commands::List {
            format,
            account,
            status,
            until,
            limit,
            user,
        } => {
            cmd_list(
                &db,
                &user,
                &format,
                account.as_deref(),
                status.as_deref(),
                until.as_deref(),
                limit,
            )
            .await?;
        }
        Commands::Stats { format, user } => {
            cmd_stats(&db, &user, &format).await?;
        }
        Commands::Cancel {
            item_id,
            all,
            account,
            platform,
            before,
            force,
            user,
        } => {
            cmd_cancel(
                &db,
                &user,
                item_id.as_deref(),
                all,
                account,
                platform.as_deref(),
                before.as_deref(),
                force,
            )
            .await?;
        }
        Commands::Load { file, user } => {
            cmd_load(&db, &user, &file).await?;
        }
    }

    Ok(())
}

/// Write a starter config file
fn cmd_init(force: bool) -> Result<()> {
    let path = resolve_config_path()?;
    if path.exists() && !force {
        return Err(DripcastError::InvalidInput(format!(
            "Config already exists at {}. Use --force to overwrite",
            path.display()
        )));
    }
    generate_default_config(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Queue a single post
#[allow(clippy::too_many_arguments)]
async fn cmd_add(
    db: &Database,
    user: &str,
    account_id: &str,
    text: &str,
    schedule: &str,
    media_url: Option<String>,
    priority: i64,
    max_attempts: i64,
) -> Result<()> {
    require_account(db, user, account_id).await?;

    // random:MIN-MAX drips relative to the account's latest queued item
    let last = db.last_scheduled_for(account_id).await?;
    let scheduled_for = parse_when(schedule, last)?;

    let item = QueueItem::new(
        user,
        account_id,
        Content::Post {
            text: text.to_string(),
            media_url,
            variation_id: None,
        },
        EnqueueOptions {
            scheduled_for: Some(scheduled_for),
            priority,
            max_attempts,
        },
    );
    db.insert_item(&item).await?;

    let now = Utc::now().timestamp();
    println!(
        "Queued {} | {} | {}",
        item.id,
        format_timestamp(item.scheduled_for),
        format_time_until(now, item.scheduled_for)
    );
    Ok(())
}

#[derive(Debug, Deserialize)]
struct BulkPost {
    text: String,
    #[serde(default)]
    media_url: Option<String>,
}

/// Queue posts from a JSON file, spaced a fixed gap apart
async fn cmd_bulk(
    db: &Database,
    user: &str,
    account_id: &str,
    file: &str,
    start: &str,
    every: &str,
) -> Result<()> {
    require_account(db, user, account_id).await?;

    let raw = std::fs::read_to_string(file)
        .map_err(|e| DripcastError::InvalidInput(format!("Cannot read {}: {}", file, e)))?;
    let posts: Vec<BulkPost> = serde_json::from_str(&raw)
        .map_err(|e| DripcastError::InvalidInput(format!("Invalid bulk file {}: {}", file, e)))?;
    if posts.is_empty() {
        return Err(DripcastError::InvalidInput(format!(
            "{} contains no posts",
            file
        )));
    }

    let start_at = parse_when(start, None)?;
    let gap = parse_gap(every)?;

    let items: Vec<QueueItem> = posts
        .into_iter()
        .enumerate()
        .map(|(i, post)| {
            QueueItem::new(
                user,
                account_id,
                Content::Post {
                    text: post.text,
                    media_url: post.media_url,
                    variation_id: None,
                },
                EnqueueOptions {
                    scheduled_for: Some(start_at + i as i64 * gap),
                    ..EnqueueOptions::default()
                },
            )
        })
        .collect();

    let inserted = db.bulk_insert_items(&items).await?;
    println!(
        "Queued {} post(s) for {} starting {}",
        inserted,
        account_id,
        format_timestamp(start_at)
    );
    Ok(())
}

/// Spread unused content across accounts
#[allow(clippy::too_many_arguments)]
async fn cmd_schedule(
    db: &Database,
    user: &str,
    accounts: Vec<String>,
    items_per_account: usize,
    start: &str,
    end: Option<&str>,
    uniform: bool,
    no_shuffle: bool,
) -> Result<()> {
    let start_at = parse_when(start, None)?;
    let end_at = end.map(|e| parse_when(e, None)).transpose()?;

    let scheduler = BulkScheduler::new(db.clone());
    let summary = scheduler
        .schedule(&BulkScheduleRequest {
            user_id: user.to_string(),
            account_ids: accounts,
            items_per_account,
            start: start_at,
            end: end_at,
            use_optimal_times: !uniform,
            randomize: !no_shuffle,
        })
        .await?;

    println!(
        "Queued {} item(s) across {} account(s)",
        summary.total_queued, summary.accounts
    );
    if let (Some(first), Some(last)) = (summary.first_scheduled, summary.last_scheduled) {
        println!("First: {}", format_timestamp(first));
        println!("Last:  {}", format_timestamp(last));
    }
    Ok(())
}

/// Re-spread an account's pending items
async fn cmd_reschedule(db: &Database, account_id: &str, time: &str) -> Result<()> {
    let new_start = parse_when(time, None)?;
    let scheduler = BulkScheduler::new(db.clone());
    let moved = scheduler.reschedule_account(account_id, new_start).await?;
    println!(
        "Rescheduled {} item(s) for {} from {}",
        moved,
        account_id,
        format_timestamp(new_start)
    );
    Ok(())
}

/// List queued items
async fn cmd_list(
    db: &Database,
    user: &str,
    format: &str,
    account: Option<&str>,
    status: Option<&str>,
    until: Option<&str>,
    limit: i64,
) -> Result<()> {
    validate_format(format)?;
    let until_at = until.map(|u| parse_when(u, None)).transpose()?;

    match status {
        Some(status) => {
            let status = parse_status(status)?;
            let mut items = db.list_items(Some(user), Some(status), account, limit).await?;
            if let Some(until_at) = until_at {
                items.retain(|i| i.scheduled_for <= until_at);
            }
            if format == "json" {
                output_items_json(&items);
            } else {
                output_items_text(&items);
            }
        }
        None => {
            let rows = db.list_scheduled(user, account, until_at, limit).await?;
            if format == "json" {
                output_scheduled_json(&rows);
            } else {
                output_scheduled_text(&rows);
            }
        }
    }
    Ok(())
}

/// Show queue statistics
async fn cmd_stats(db: &Database, user: &str, format: &str) -> Result<()> {
    validate_format(format)?;
    let stats = db.status_counts(Some(user)).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats).unwrap());
    } else {
        println!("Pending: {}", stats.pending);
        println!("Processing: {}", stats.processing);
        println!("Rate limited: {}", stats.rate_limited);
        println!("Posted: {}", stats.posted);
        println!("Failed: {}", stats.failed);
        println!("Cancelled: {}", stats.cancelled);
        println!("Total: {}", stats.total);
    }
    Ok(())
}

/// Cancel queued items, one by ID or many by filter
#[allow(clippy::too_many_arguments)]
async fn cmd_cancel(
    db: &Database,
    user: &str,
    item_id: Option<&str>,
    all: bool,
    account: Option<String>,
    platform: Option<&str>,
    before: Option<&str>,
    force: bool,
) -> Result<()> {
    match item_id {
        Some(id) => {
            if uuid::Uuid::parse_str(id).is_err() {
                return Err(DripcastError::InvalidInput(format!(
                    "Invalid item ID: {}",
                    id
                )));
            }
            if !force && !confirm(&format!("Cancel item {}?", id))? {
                println!("Aborted");
                return Ok(());
            }
            if db.cancel_item(id, user).await? {
                println!("Cancelled {}", id);
            } else {
                return Err(DripcastError::InvalidInput(format!(
                    "No cancellable item with ID {}",
                    id
                )));
            }
        }
        None => {
            if !all {
                return Err(DripcastError::InvalidInput(
                    "Provide an item ID or --all".to_string(),
                ));
            }
            let filter = CancelFilter {
                account_id: account,
                platform: platform.map(|p| p.parse::<Platform>()).transpose()?,
                before: before.map(|b| parse_when(b, None)).transpose()?,
            };
            if !force && !confirm("Cancel all matching queued items?")? {
                println!("Aborted");
                return Ok(());
            }
            let cancelled = db.cancel_items(user, &filter).await?;
            println!("Cancelled {} item(s)", cancelled);
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    rate_limits: Vec<RateLimitRule>,
    #[serde(default)]
    content: Vec<SeedContent>,
}

#[derive(Debug, Deserialize)]
struct SeedContent {
    body: String,
    #[serde(default = "default_quality")]
    quality_score: f64,
}

fn default_quality() -> f64 {
    0.5
}

/// Seed accounts, rate rules, and content from a JSON file
async fn cmd_load(db: &Database, user: &str, file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| DripcastError::InvalidInput(format!("Cannot read {}: {}", file, e)))?;
    let seed: SeedFile = serde_json::from_str(&raw)
        .map_err(|e| DripcastError::InvalidInput(format!("Invalid seed file {}: {}", file, e)))?;

    for account in &seed.accounts {
        db.upsert_account(account).await?;
    }
    for rule in &seed.rate_limits {
        db.upsert_rate_limit_rule(rule).await?;
    }
    for entry in &seed.content {
        db.insert_content(&ContentEntry::new(user, &entry.body, entry.quality_score))
            .await?;
    }

    println!(
        "Loaded {} account(s), {} rate rule(s), {} content item(s)",
        seed.accounts.len(),
        seed.rate_limits.len(),
        seed.content.len()
    );
    Ok(())
}

/// Reject unknown accounts and accounts owned by someone else
async fn require_account(db: &Database, user: &str, account_id: &str) -> Result<Account> {
    match db.get_account(account_id).await? {
        Some(account) if account.user_id == user => Ok(account),
        _ => Err(DripcastError::InvalidInput(format!(
            "No account '{}' for user '{}'",
            account_id, user
        ))),
    }
}

/// Parse a status filter, rejecting unknown values instead of defaulting
fn parse_status(s: &str) -> Result<QueueStatus> {
    match s {
        "pending" => Ok(QueueStatus::Pending),
        "processing" => Ok(QueueStatus::Processing),
        "posted" => Ok(QueueStatus::Posted),
        "failed" => Ok(QueueStatus::Failed),
        "rate_limited" => Ok(QueueStatus::RateLimited),
        "cancelled" => Ok(QueueStatus::Cancelled),
        other => Err(DripcastError::InvalidInput(format!(
            "Invalid status '{}'. One of: pending, processing, posted, failed, rate_limited, cancelled",
            other
        ))),
    }
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(DripcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// Parse a humantime gap like "45m" into whole seconds
fn parse_gap(input: &str) -> Result<i64> {
    let duration = humantime::parse_duration(input)
        .map_err(|e| DripcastError::InvalidInput(format!("Invalid gap '{}': {}", input, e)))?;
    i64::try_from(duration.as_secs())
        .map_err(|_| DripcastError::InvalidInput(format!("Gap '{}' is too large", input)))
}

/// Ask for confirmation on stdin. Anything but y/yes aborts.
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    print!("{} [y/N] ", prompt);
    std::io::stdout()
        .flush()
        .map_err(|e| DripcastError::InvalidInput(format!("Cannot prompt: {}", e)))?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| DripcastError::InvalidInput(format!("Cannot read confirmation: {}", e)))?;

    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Output upcoming items as JSON
fn output_scheduled_json(rows: &[ClaimedItem]) {
    let json: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "id": row.item.id,
                "account_id": row.item.account_id,
                "account": row.account.as_ref().map(|a| {
                    serde_json::json!({
                        "username": a.username,
                        "platform": a.platform.as_str(),
                        "status": a.status.as_str(),
                    })
                }),
                "kind": row.item.content.kind(),
                "text": row.item.content.text(),
                "scheduled_for": row.item.scheduled_for,
                "status": row.item.status.as_str(),
                "attempts": row.item.attempts,
                "priority": row.item.priority,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

/// Output upcoming items as human-readable text
fn output_scheduled_text(rows: &[ClaimedItem]) {
    if rows.is_empty() {
        return;
    }

    let now = Utc::now().timestamp();

    for row in rows {
        let account = row
            .account
            .as_ref()
            .map(|a| format!("{}@{}", a.username, a.platform))
            .unwrap_or_else(|| row.item.account_id.clone());

        println!(
            "{} | {} | {} | {}",
            row.item.id,
            account,
            truncate_content(row.item.content.text(), 50),
            format_time_until(now, row.item.scheduled_for)
        );
    }
}

/// Output status-filtered items as JSON
fn output_items_json(items: &[QueueItem]) {
    let json: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "account_id": item.account_id,
                "kind": item.content.kind(),
                "text": item.content.text(),
                "scheduled_for": item.scheduled_for,
                "status": item.status.as_str(),
                "attempts": item.attempts,
                "error_message": item.error_message,
                "posted_at": item.posted_at,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

/// Output status-filtered items as human-readable text
fn output_items_text(items: &[QueueItem]) {
    if items.is_empty() {
        return;
    }

    for item in items {
        println!(
            "{} | {} | {} | {}",
            item.id,
            item.status,
            truncate_content(item.content.text(), 50),
            format_timestamp(item.scheduled_for)
        );
    }
}

/// Truncate content to max length with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        content.to_string()
    } else {
        let head: String = content.chars().take(max_len).collect();
        format!("{}...", head)
    }
}

/// Render a unix timestamp as UTC wall time
fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_for: i64) -> String {
    let diff = scheduled_for - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
