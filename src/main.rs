use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use newsdesk::config::Config;
use newsdesk::remote::{HttpFeedClient, RemoteFeedService};
use newsdesk::storage::{LocalStore, Sentiment};
use newsdesk::sync::{HeadlinePage, HeadlineReader, Origin, SyncCoordinator, SyncReport};

/// Get the config directory path (~/.config/newsdesk/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsdesk"))
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Offline-first headline cache and sync engine")]
struct Args {
    /// Config file (default: ~/.config/newsdesk/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides database_path from config)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync headlines and the live feed once, ignoring cadence
    Sync,
    /// Keep both channels synced until interrupted (SIGUSR1 = foreground)
    Run,
    /// Show headlines for a category and sentiment
    Headlines {
        category: String,
        sentiment: Sentiment,
        #[arg(long)]
        limit: Option<usize>,
        /// Sync before reading
        #[arg(long)]
        refresh: bool,
    },
    /// Show the live feed
    Live {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show local data statistics and sync status
    Stats,
    /// List categories known to the service
    Categories,
    /// Check service health
    Health,
    /// Delete all local data and the sync cursor
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("newsdesk=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env_overrides();

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => {
            let path = config.database_path_in(&config_dir);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory {}", parent.display())
                })?;
            }
            path
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let store = LocalStore::open(db_path_str).await;
    if !store.is_available() {
        eprintln!(
            "Warning: local store at {} is unavailable, running without a cache",
            db_path.display()
        );
    }

    let remote: Arc<dyn RemoteFeedService> = Arc::new(
        HttpFeedClient::new(&config.api_base_url, config.request_timeout())
            .context("Failed to create feed service client")?,
    );
    let coordinator = Arc::new(SyncCoordinator::new(
        store.clone(),
        Arc::clone(&remote),
        config.sync_settings(),
    ));
    let reader = HeadlineReader::new(Arc::clone(&coordinator));

    match args.command {
        Command::Sync => {
            let report = coordinator.force_sync().await;
            print_report(&report);
            if report.headlines.is_failure() || report.live_feed.is_failure() {
                std::process::exit(1);
            }
        }
        Command::Run => run(&coordinator).await?,
        Command::Headlines {
            category,
            sentiment,
            limit,
            refresh,
        } => {
            let limit = limit.unwrap_or(config.headlines_limit);
            let page = if refresh {
                reader.refresh(&category, sentiment, limit).await
            } else {
                reader.headlines(&category, sentiment, limit).await
            }
            .context("No local headlines and the feed service is unreachable")?;
            print_headlines(&category, sentiment, &page);
        }
        Command::Live { limit } => {
            let limit = limit.unwrap_or(config.live_feed_limit);
            let page = reader
                .live_feed(limit)
                .await
                .context("No local live feed and the feed service is unreachable")?;
            println!("Live feed ({}):", origin_label(page.origin));
            for entry in &page.entries {
                println!(
                    "  [{}] {} ({}, {})",
                    entry.category, entry.headline, entry.source, entry.timestamp
                );
            }
            if page.entries.is_empty() {
                println!("  (empty)");
            }
        }
        Command::Stats => {
            let stats = store.get_data_stats().await;
            let status = coordinator.get_sync_status();
            println!("Headlines:        {}", stats.total_headlines);
            println!(
                "Latest headline:  {}",
                stats.latest_timestamp.as_deref().unwrap_or("-")
            );
            println!(
                "Update id:        {}",
                stats.last_update_id.as_deref().unwrap_or("never synced")
            );
            println!(
                "Last sync:        {}",
                stats.last_sync_time.as_deref().unwrap_or("-")
            );
            println!(
                "Live feed items:  {}",
                store.get_live_feed_headlines(usize::MAX).await.len()
            );
            println!(
                "In flight:        headlines={} live_feed={}",
                status.headlines.in_flight, status.live_feed.in_flight
            );
        }
        Command::Categories => {
            let categories = remote
                .get_categories()
                .await
                .context("Failed to fetch categories")?;
            for category in categories {
                println!("{category}");
            }
        }
        Command::Health => {
            let health = remote
                .health_check()
                .await
                .context("Feed service health check failed")?;
            println!(
                "{} ({})",
                health.status,
                health.timestamp.as_deref().unwrap_or("no timestamp")
            );
            if !health.is_healthy() {
                std::process::exit(1);
            }
        }
        Command::Reset => {
            store
                .clear_all_data()
                .await
                .context("Failed to clear local data")?;
            println!("Local data cleared.");
        }
    }

    Ok(())
}

/// Auto-sync until SIGINT/SIGTERM. SIGUSR1 is treated as a foreground
/// transition.
async fn run(coordinator: &Arc<SyncCoordinator>) -> Result<()> {
    #[cfg(unix)]
    use tokio::signal::unix::{signal, SignalKind};

    let handle = coordinator.start_auto_sync();
    // Foreground syncs run off the signal loop so shutdown stays responsive
    let mut foreground = JoinSet::new();

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;
    #[cfg(unix)]
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = async { tokio::signal::ctrl_c().await.ok() };

        #[cfg(unix)]
        let foreground_fut = sigusr1.recv();
        #[cfg(not(unix))]
        let foreground_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down");
                break;
            }

            _ = foreground_fut => {
                let coordinator = Arc::clone(coordinator);
                foreground.spawn(async move {
                    let report = coordinator.on_foreground().await;
                    tracing::info!(
                        headlines = %report.headlines,
                        live_feed = %report.live_feed,
                        "Foreground sync"
                    );
                });
            }

            Some(joined) = foreground.join_next(), if !foreground.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Foreground sync task failed");
                }
            }
        }
    }

    while foreground.join_next().await.is_some() {}
    handle.shutdown().await;
    Ok(())
}

fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::Local => "cached",
        Origin::Remote => "live from service",
    }
}

fn print_report(report: &SyncReport) {
    println!("Headlines: {}", report.headlines);
    println!("Live feed: {}", report.live_feed);
}

fn print_headlines(category: &str, sentiment: Sentiment, page: &HeadlinePage) {
    println!(
        "{} {} headlines ({}):",
        category,
        sentiment,
        origin_label(page.origin())
    );
    for (headline, source_url, timestamp) in page.summaries() {
        println!("  {timestamp}  {headline}");
        if !source_url.is_empty() {
            println!("      {source_url}");
        }
    }
    if page.is_empty() {
        println!("  (none)");
    }
}
