//! drip-send - Background daemon for scheduled posting
//!
//! Watches the posting queue and sends due items at the scheduled time.

use clap::Parser;
use libdripcast::api::HttpPostClient;
use libdripcast::device::HttpDeviceDriver;
use libdripcast::error::ConfigError;
use libdripcast::logging;
use libdripcast::{
    Config, Database, Dispatcher, DripcastError, QueueProcessor, Result, TickOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "drip-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
drip-send - Background daemon for scheduled posting

DESCRIPTION:
    drip-send is a long-running daemon that watches the Dripcast posting
    queue and sends due items at the right time.

    It polls the store at a fixed interval, claims due items in batches,
    enforces per-platform rate limits, dispatches through the post API or
    a device bridge, and reschedules failures with exponential backoff.

USAGE:
    # Run in foreground (logs to stderr)
    drip-send

    # Run with custom poll interval
    drip-send --poll-interval 30

    # Enable verbose logging
    drip-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    Configuration file: ~/.config/dripcast/config.toml
    Database location: ~/.local/share/dripcast/queue.db

    [queue]
    poll_interval = 60          # seconds between passes
    batch_size = 100            # items claimed per pass
    inter_item_delay_ms = 1000  # pause between items within a pass

    [post_api]
    base_url = \"https://api.upload-post.com\"
    api_key_file = \"~/.config/dripcast/api.key\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Database or configuration error

For more information, visit: https://github.com/dripcast/dripcast
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due items (default: from config)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due items once and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    logging::init("info", cli.verbose);

    // Run the daemon and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    info!("drip-send daemon starting");

    let processor = build_processor(&config, db)?;

    // Set up graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    // Determine poll interval
    let poll_interval = cli.poll_interval.unwrap_or(config.queue.poll_interval);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        // Run once for testing
        run_tick(&processor).await;
        info!("drip-send: processed queue once, exiting");
    } else {
        // Normal daemon mode
        run_daemon_loop(&processor, poll_interval, shutdown).await;
    }

    info!("drip-send daemon stopped");
    Ok(())
}

/// Wire the dispatch stack from config. The post API section is required;
/// the device bridge falls back to its defaults.
fn build_processor(config: &Config, db: Database) -> Result<QueueProcessor> {
    let post_api = config
        .post_api
        .as_ref()
        .ok_or_else(|| DripcastError::Config(ConfigError::MissingField("post_api".to_string())))?;

    let post_client = Arc::new(HttpPostClient::from_config(post_api)?);
    let device = Arc::new(HttpDeviceDriver::from_config(
        &config.device.clone().unwrap_or_default(),
    ));

    let dispatcher = Dispatcher::new(post_client, device);
    Ok(QueueProcessor::new(db, dispatcher, &config.queue))
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| DripcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    // Spawn thread to handle signals
    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(
    processor: &QueueProcessor,
    poll_interval: u64,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        // Check for shutdown signal
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        run_tick(processor).await;

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Run one processing pass and log its outcome. Errors are logged, never
/// fatal; the next poll gets a fresh chance.
async fn run_tick(processor: &QueueProcessor) {
    match processor.tick().await {
        Ok(TickOutcome::Completed(summary)) => {
            if summary.claimed == 0 {
                debug!("Queue idle");
            } else {
                info!("Pass finished: {}", summary);
            }
        }
        Ok(TickOutcome::AlreadyRunning) => {
            warn!("Previous pass still running, skipping");
        }
        Err(e) => {
            error!("Queue pass failed: {}", e);
        }
    }
}
