mod config;
mod consumer;
mod enricher;
mod events;
mod index;
mod models;
mod providers;
mod queue;
mod scheduler;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::BinderyConfig;
use consumer::{Reindexer, SyncConsumer};
use enricher::{EnrichService, Enricher};
use events::CatalogService;
use index::{HttpSearchIndex, SearchIndex};
use models::SyncInstruction;
use providers::{GenerativeClient, LookupClient, MetadataProvider};
use queue::SyncQueue;
use scheduler::Scheduler;
use storage::locks::SqliteLockStore;
use storage::CatalogStorage;

#[derive(Parser)]
#[command(name = "bindery")]
#[command(about = "Catalog enrichment and search index sync daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = "bindery.toml")]
    config: PathBuf,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enrichment scheduler, worker pool and sync consumer
    Run,

    /// Re-project the entire catalog into the search index
    Reindex,

    /// Enqueue a sync instruction by hand
    Sync {
        /// Category id whose subtree should be re-projected
        #[arg(long, conflicts_with = "tag")]
        category: Option<i64>,
        /// Tag id whose books should be re-projected
        #[arg(long)]
        tag: Option<i64>,
    },

    /// Rename a category and sync its subtree
    RenameCategory {
        /// Category id
        id: i64,
        /// New name
        name: String,
    },

    /// Rename a tag and sync its books
    RenameTag {
        /// Tag id
        id: i64,
        /// New name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bindery={}", cli.log_level).into());
    let text_logging = std::env::var("BINDERY_LOG_TEXT")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(true);
    if text_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }

    let cfg = config::load_config(&cli.config);

    let storage = CatalogStorage::new(&cfg.storage.db_path).await?;
    storage.migrate().await?;

    match cli.command {
        Commands::Run => run_daemon(storage, cfg).await,
        Commands::Reindex => {
            let index: Arc<dyn SearchIndex> = Arc::new(HttpSearchIndex::new(&cfg.index)?);
            let reindexer = Reindexer::new(storage, index, cfg.consumer.page_size);
            let count = reindexer.reindex_all().await?;
            println!("reindexed {count} books");
            Ok(())
        }
        Commands::Sync { category, tag } => {
            let queue = SyncQueue::new(&storage, cfg.consumer.max_attempts);
            let instruction = match (category, tag) {
                (Some(id), None) => SyncInstruction::category(id),
                (None, Some(id)) => SyncInstruction::tag(id),
                _ => anyhow::bail!("pass exactly one of --category or --tag"),
            };
            queue.publish(&instruction).await?;
            println!("sync instruction enqueued");
            Ok(())
        }
        Commands::RenameCategory { id, name } => {
            let queue = Arc::new(SyncQueue::new(&storage, cfg.consumer.max_attempts));
            let service = CatalogService::new(storage, queue);
            if service.rename_category(id, &name).await? {
                println!("category {id} renamed, sync enqueued");
            } else {
                println!("category {id} already has that name");
            }
            Ok(())
        }
        Commands::RenameTag { id, name } => {
            let queue = Arc::new(SyncQueue::new(&storage, cfg.consumer.max_attempts));
            let service = CatalogService::new(storage, queue);
            if service.rename_tag(id, &name).await? {
                println!("tag {id} renamed, sync enqueued");
            } else {
                println!("tag {id} already has that name");
            }
            Ok(())
        }
    }
}

async fn run_daemon(storage: CatalogStorage, cfg: BinderyConfig) -> anyhow::Result<()> {
    tracing::info!("bindery starting (pid {})", std::process::id());

    let index: Arc<dyn SearchIndex> = Arc::new(HttpSearchIndex::new(&cfg.index)?);

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(LookupClient::new(&cfg.providers)?),
        Arc::new(GenerativeClient::new(&cfg.providers)?),
    ];

    let queue = Arc::new(SyncQueue::new(&storage, cfg.consumer.max_attempts));

    let enricher = Arc::new(Enricher::new(
        storage.clone(),
        index.clone(),
        providers,
        cfg.enrichment.empty_pass_threshold,
    ));

    let cancel = CancellationToken::new();

    let (task_tx, task_rx) = mpsc::channel(256);
    let enrich_service = EnrichService::new(enricher, cfg.enrichment.workers);
    let enrich_handle = tokio::spawn(enrich_service.run(task_rx));

    let locks = Arc::new(SqliteLockStore::new(&storage));
    let scheduler = Scheduler::new(storage.clone(), locks, task_tx, cfg.scheduler.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    let reindexer = Reindexer::new(storage.clone(), index, cfg.consumer.page_size);
    let sync_consumer = SyncConsumer::new(
        queue,
        reindexer,
        Duration::from_secs(cfg.consumer.poll_interval_secs),
        Duration::from_secs(cfg.consumer.inflight_timeout_secs),
    );
    let consumer_handle = tokio::spawn(sync_consumer.run(cancel.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    // The scheduler owns the only task sender; once it exits the worker
    // pool drains its channel and stops on its own.
    let _ = scheduler_handle.await;
    let _ = consumer_handle.await;
    let _ = enrich_handle.await;

    tracing::info!("bindery stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
