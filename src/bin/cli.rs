//! Review monitor CLI
//!
//! Runs a single pass (`run`) for use from cron, or polls on a fixed
//! interval (`watch`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use review_monitor::{
    error::Result,
    models::Config,
    pipeline::{self, RunReport, RunSettings},
    services::{HttpSource, TelegramNotifier},
    storage::{LocalStore, SeenStore},
};

/// review-monitor - forwards new job-review postings to Telegram
#[derive(Parser, Debug)]
#[command(name = "review-monitor", version, about = "Job review posting monitor")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check once for new postings
    Run,

    /// Check for new postings on a fixed interval
    Watch {
        /// Seconds between runs (default: schedule.interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Export every listed posting to a JSON file
    Archive {
        #[arg(short, long, default_value = "all_posts.json")]
        output: PathBuf,

        /// Maximum number of listing pages to read
        #[arg(long, default_value_t = 50)]
        max_pages: usize,
    },

    /// Validate configuration
    Validate,

    /// Show the state of the seen-set
    Info,

    /// Send a test message to the configured chat
    Ping {
        #[arg(long, default_value = "review-monitor test message")]
        text: String,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn log_report(report: &RunReport) {
    log::info!(
        "Run finished in {} ms: {:?}, {} fetched, {} new, {} delivered, {} failed, store {}/{}",
        (report.finished_at - report.started_at).num_milliseconds(),
        report.mode,
        report.fetched,
        report.new_items,
        report.delivered,
        report.failed,
        report.stored,
        report.capacity
    );
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env(|key| std::env::var(key).ok());

    let store = LocalStore::new(&config.store.path, config.store.capacity);

    match cli.command {
        Command::Run => {
            config.validate()?;

            let source = HttpSource::new(config.source.clone())?;
            let notifier = TelegramNotifier::new(config.notifier.clone())?;
            let settings = RunSettings::from_config(&config);

            let report = pipeline::run_once(&settings, &source, &store, &notifier).await;
            log_report(&report);
        }

        Command::Watch { interval } => {
            config.validate()?;

            let source = HttpSource::new(config.source.clone())?;
            let notifier = TelegramNotifier::new(config.notifier.clone())?;
            let settings = RunSettings::from_config(&config);

            let every = Duration::from_secs(interval.unwrap_or(config.schedule.interval_secs).max(1));
            log::info!("Watching {} every {:?}", config.source.url, every);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
            };
            pipeline::watch(&settings, &source, &store, &notifier, every, shutdown, log_report).await;
        }

        Command::Archive { output, max_pages } => {
            config.validate_source()?;

            let source = HttpSource::new(config.source.clone())?;
            pipeline::run_archive(&source, max_pages, &output).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Source: {}", config.source.url);
            log::info!(
                "✓ Store: {} (capacity {}, {:?})",
                config.store.path.display(),
                config.store.capacity,
                config.store.policy
            );
            log::info!("✓ Telegram credentials present");
        }

        Command::Info => {
            log::info!("State file: {}", store.path().display());

            match store.peek().await {
                Ok(Some(items)) => {
                    log::info!("Store occupancy: {}/{}", items.len(), store.capacity());
                    if let Some(top) = items.first() {
                        log::info!("Topmost posting: {} ({})", top.title, top.link);
                    }
                }
                Ok(None) => log::info!("No state file yet; the next run is a first run"),
                Err(e) => log::warn!("State file unusable, the next run will reset it: {}", e),
            }
        }

        Command::Ping { text } => {
            config.validate()?;

            let notifier = TelegramNotifier::new(config.notifier.clone())?;
            let attempts = notifier.send_text(&text).await?;
            log::info!("Test message sent after {} attempt(s)", attempts);
        }
    }

    Ok(())
}
