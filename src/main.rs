use anyhow::Context;
use card_sync::app::ports::SnapshotSource;
use card_sync::config::SyncConfig;
use card_sync::infra::http_client::ReqwestSnapshotSource;
use card_sync::logging::init_logging;
use card_sync::metrics;
use card_sync::pipeline::{RunOutcome, SyncPipeline};
use card_sync::storage::{CatalogStore, InMemoryStore, SqliteStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "card_sync")]
#[command(about = "Synchronizes the trading-card catalog snapshot into local storage")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a TOML config file (defaults to ./card_sync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass (the default when no command is given)
    Run {
        /// Reconcile even when the upstream fingerprint matches the last sync
        #[arg(long)]
        force: bool,
        /// Reconcile into an in-memory store; the database is not touched
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the stored sync marker and catalog row counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = SyncConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _guard = init_logging(&config.logging.log_dir);

    match cli.command.unwrap_or(Commands::Run { force: false, dry_run: false }) {
        Commands::Run { force, dry_run } => run(config, force, dry_run).await,
        Commands::Status => status(&config).await,
    }
}

async fn run(config: SyncConfig, force: bool, dry_run: bool) -> anyhow::Result<()> {
    metrics::init_metrics();

    let source: Arc<dyn SnapshotSource> = Arc::new(ReqwestSnapshotSource::new(
        &config.upstream.user_agent,
        config.upstream.probe_timeout(),
        config.upstream.download_timeout(),
    )?);
    let store: Arc<dyn CatalogStore> = if dry_run {
        info!("Dry run: reconciling into an in-memory store");
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.storage.database_path)?)
    };

    let pushgateway_url = config.metrics.pushgateway_url.clone();
    let result = SyncPipeline::new(config, source, store).run(force).await;

    if let Some(url) = pushgateway_url {
        let instance = match &result {
            Ok(summary) => summary.run_id.to_string(),
            Err(_) => "failed".to_string(),
        };
        metrics::push_to_gateway(&url, &instance).await;
    }

    match result {
        Ok(summary) => {
            match summary.outcome {
                RunOutcome::Unchanged => println!("No changes detected. Skipping sync."),
                RunOutcome::Empty => println!("Archive contained no data. Nothing synced."),
                RunOutcome::Completed => {
                    println!("\n📊 Sync Results ({}):", summary.run_id);
                    println!(
                        "   Sets:  {} created, {} updated, {} failed",
                        summary.stats.sets.created, summary.stats.sets.updated, summary.stats.sets.failed
                    );
                    println!(
                        "   Cards: {} created, {} updated, {} failed",
                        summary.stats.cards.created, summary.stats.cards.updated, summary.stats.cards.failed
                    );
                    println!("   Batches: {}", summary.stats.batches);
                    println!("   Marker updated: {}", summary.ledger_committed);
                    println!("   Duration: {:.1}s", summary.duration_ms as f64 / 1000.0);
                }
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn status(config: &SyncConfig) -> anyhow::Result<()> {
    let Some(store) = SqliteStore::open_existing(&config.storage.database_path)? else {
        println!("No catalog database at {}", config.storage.database_path.display());
        return Ok(());
    };
    match store.load_marker(&config.sync.marker_key).await? {
        Some(marker) => {
            println!("Last sync:   {}", marker.synced_at.to_rfc3339());
            println!("Fingerprint: {}", marker.fingerprint);
        }
        None => println!("No sync recorded under '{}'", config.sync.marker_key),
    }
    println!("Sets:  {}", store.count_sets()?);
    println!("Cards: {}", store.count_cards()?);
    Ok(())
}
