use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipfeed::config::Config;
use clipfeed::source::{ContentSource, RedgifsClient};
use clipfeed::storage::{Database, SubscriptionKind};
use clipfeed::sync::Scheduler;

#[derive(Parser, Debug)]
#[command(
    name = "clipfeed",
    about = "Per-user short-video feeds kept in sync with a paginated search API"
)]
struct Args {
    /// Path to the config file
    #[arg(long, value_name = "FILE", default_value = "clipfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Run a single sync cycle followed by retention, then exit
    SyncOnce,
    /// Subscribe a user to a tag search or a creator
    Subscribe {
        user: String,
        #[arg(value_enum)]
        kind: KindArg,
        term: String,
    },
    /// Remove a user's subscription
    Unsubscribe {
        user: String,
        #[arg(value_enum)]
        kind: KindArg,
        term: String,
    },
    /// List a user's subscriptions, newest first
    Subscriptions { user: String },
    /// Print a page of a user's feed
    Feed {
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Tag,
    Creator,
}

impl From<KindArg> for SubscriptionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Tag => SubscriptionKind::Tag,
            KindArg::Creator => SubscriptionKind::Creator,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let db = open_database(&config.database_path).await?;

    match args.command {
        Command::Run => {
            let scheduler = build_scheduler(&config, db)?;
            run_until_shutdown(&scheduler).await?;
        }
        Command::SyncOnce => {
            let scheduler = build_scheduler(&config, db)?;
            let report = scheduler.run_cycle().await;
            println!(
                "Synced {} subscriptions ({} failed), pruned {} items",
                report.succeeded,
                report.failed,
                report.retention.total_deleted()
            );
            if report.failed > 0 || !report.retention.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Subscribe { user, kind, term } => {
            let subscription = db
                .subscribe(&user, kind.into(), &term)
                .await
                .context("Failed to subscribe")?;
            println!(
                "{}\t{}\t{}",
                subscription.id, subscription.kind, subscription.search_term
            );
        }
        Command::Unsubscribe { user, kind, term } => {
            let removed = db
                .unsubscribe(&user, kind.into(), &term)
                .await
                .context("Failed to unsubscribe")?;
            if removed {
                println!("Unsubscribed");
            } else {
                println!("No matching subscription");
            }
        }
        Command::Subscriptions { user } => {
            let subscriptions = db
                .list_subscriptions_for_user(&user)
                .await
                .context("Failed to list subscriptions")?;
            for sub in subscriptions {
                let state = if sub.is_initialized {
                    sub.cursor().unwrap_or("-")
                } else {
                    "pending"
                };
                println!("{}\t{}\t{}\t{}", sub.id, sub.kind, sub.search_term, state);
            }
        }
        Command::Feed {
            user,
            limit,
            offset,
        } => {
            let items = db
                .list_items_for_user(&user, limit, offset)
                .await
                .context("Failed to load feed")?;
            for item in items {
                let created = Utc
                    .timestamp_opt(item.timestamp, 0)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{}", created, item.username, item.item_id, item.url);
            }
        }
    }

    Ok(())
}

async fn open_database(path: &str) -> Result<Database> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    Database::open(path).await.map_err(|e| match e {
        clipfeed::storage::DatabaseError::InstanceLocked => {
            anyhow::anyhow!("Database {path} is locked by another process")
        }
        other => anyhow::Error::new(other).context(format!("Failed to open database {path}")),
    })
}

fn build_scheduler(config: &Config, db: Database) -> Result<Scheduler> {
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .timeout(config.http_timeout())
        .user_agent(concat!("clipfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let client = RedgifsClient::new(http, &config.source.api_base_url)
        .context("Invalid content source configuration")?;

    let settings = config.sync_settings();
    let retry_budget = client.retry_budget(config.http_timeout());
    if settings.request_timeout < config.http_timeout() {
        tracing::warn!(
            request_timeout_secs = settings.request_timeout.as_secs(),
            http_timeout_secs = config.http_timeout().as_secs(),
            "Page timeout is shorter than a single HTTP attempt"
        );
    } else if settings.request_timeout < retry_budget {
        tracing::info!(
            request_timeout_secs = settings.request_timeout.as_secs(),
            retry_budget_secs = retry_budget.as_secs(),
            "Source retries that outlast the page timeout are reported as timeouts"
        );
    }
    let source: Arc<dyn ContentSource> = Arc::new(client);

    let worst_case = settings.request_timeout * settings.max_pages;
    if worst_case >= config.refresh_interval() {
        tracing::warn!(
            worst_case_secs = worst_case.as_secs(),
            interval_secs = config.refresh_interval().as_secs(),
            "A single subscription sync can outlast the refresh interval"
        );
    }

    Ok(Scheduler::new(
        db,
        source,
        settings,
        config.retention_policy(),
        config.refresh_interval(),
    ))
}

/// Drive the scheduler until SIGINT or SIGTERM.
async fn run_until_shutdown(scheduler: &Scheduler) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down gracefully");
            }
            _ = scheduler.start() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl-C, shutting down gracefully");
            }
            _ = scheduler.start() => {}
        }
    }

    Ok(())
}
