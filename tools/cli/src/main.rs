//! GeoSync CLI - Command line interface for the local replica.
//!
//! Runs sync sessions against the configured GraphQL service, keeps a
//! scheduler running in the foreground, and inspects the replica.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geosync_storage::{Beacon, CursorStore, Database, EntityStore, Geofence, SqliteCursorStore};
use geosync_sync::{
    BeaconParticipant, GeoSyncConfig, GeofenceParticipant, HttpTransport, SyncCoordinator, SyncJob,
    SyncOutcome, SyncScheduler,
};

#[derive(Parser)]
#[command(name = "geosync")]
#[command(about = "GeoSync - Incremental sync of geofences and beacons")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync session and exit.
    Sync,

    /// Keep syncing in the background until interrupted.
    Run {
        /// Override the periodic interval, in seconds.
        #[arg(short, long)]
        interval_secs: Option<u64>,
    },

    /// List rows stored locally.
    List {
        /// Collection to list.
        #[arg(value_enum)]
        collection: Collection,

        /// Maximum number of rows to print.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the schema version and persisted cursors.
    Cursors,

    /// Clear all cursors, forcing a full resync on the next session.
    Reset,

    /// Print the effective configuration.
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Collection {
    Geofences,
    Beacons,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => GeoSyncConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => GeoSyncConfig::from_env(),
    };

    match cli.command {
        Commands::Sync => cmd_sync(&config).await,
        Commands::Run { interval_secs } => cmd_run(config, interval_secs).await,
        Commands::List { collection, limit } => cmd_list(&config, collection, limit),
        Commands::Cursors => cmd_cursors(&config),
        Commands::Reset => cmd_reset(&config),
        Commands::Config => cmd_config(&config),
    }
}

fn open_database(config: &GeoSyncConfig) -> Result<Database> {
    Database::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))
}

/// Coordinator with the geofence and beacon participants registered.
fn build_coordinator(config: &GeoSyncConfig) -> Result<Arc<SyncCoordinator<HttpTransport>>> {
    config.validate().context("Invalid configuration")?;
    let db = open_database(config)?;
    let cursors: Arc<dyn CursorStore> = Arc::new(SqliteCursorStore::new(db.clone()));
    let page_size = config.sync.page_size;

    let transport = HttpTransport::from_config(config).context("Failed to create transport")?;
    let coordinator = SyncCoordinator::new(transport);
    coordinator.register_participant(Arc::new(GeofenceParticipant::new(
        EntityStore::new(db.clone()),
        cursors.clone(),
        page_size,
    )?))?;
    coordinator.register_participant(Arc::new(BeaconParticipant::new(
        EntityStore::new(db),
        cursors,
        page_size,
    )?))?;

    Ok(Arc::new(coordinator))
}

/// Run one session.
async fn cmd_sync(config: &GeoSyncConfig) -> Result<()> {
    info!("Syncing with {}", config.endpoint);
    let coordinator = build_coordinator(config)?;

    let outcome = coordinator.sync().await;
    let stats = coordinator.stats();
    let duration = stats.last_duration.unwrap_or_default();

    match outcome {
        SyncOutcome::Succeeded => {
            println!(
                "Sync succeeded: {} rounds in {:.2}s",
                stats.rounds,
                duration.as_secs_f64()
            );
            Ok(())
        }
        SyncOutcome::RetryNeeded => {
            anyhow::bail!(
                "Sync incomplete after {} rounds; applied pages are kept, run again to resume",
                stats.rounds
            )
        }
    }
}

/// Run the scheduler until Ctrl-C.
async fn cmd_run(mut config: GeoSyncConfig, interval_secs: Option<u64>) -> Result<()> {
    if let Some(secs) = interval_secs {
        config.sync.periodic = true;
        config.sync.periodic_interval = std::time::Duration::from_secs(secs);
    }
    let coordinator = build_coordinator(&config)?;
    let job = SyncJob::new(&coordinator);

    let (scheduler, handle) = SyncScheduler::new(config.sync.mode());
    let handle = handle.with_retry(config.retry.clone());
    let task = tokio::spawn(handle.run(move || {
        let job = job.clone();
        async move { job.run().await }
    }));

    info!("Scheduler running ({:?}), press Ctrl-C to stop", config.sync.mode());
    if config.sync.run_on_start {
        scheduler.notify_foreground().await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping scheduler");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    let stats = coordinator.stats();
    println!(
        "Ran {} sessions: {} succeeded, {} need retry",
        stats.sessions_started, stats.sessions_succeeded, stats.sessions_retry_needed
    );

    Ok(())
}

/// List local rows.
fn cmd_list(config: &GeoSyncConfig, collection: Collection, limit: Option<usize>) -> Result<()> {
    let db = open_database(config)?;
    let limit = limit.unwrap_or(usize::MAX);

    match collection {
        Collection::Geofences => {
            let store = EntityStore::<Geofence>::new(db);
            println!("{} geofences stored locally", store.count()?);
            for geofence in store.query_all().take(limit) {
                let geofence = geofence?;
                println!(
                    "  {}  ({:.6}, {:.6}) r={}m  {}{}",
                    geofence.id,
                    geofence.latitude,
                    geofence.longitude,
                    geofence.radius,
                    geofence.description,
                    if geofence.enabled { "" } else { " [disabled]" }
                );
            }
        }
        Collection::Beacons => {
            let store = EntityStore::<Beacon>::new(db);
            println!("{} beacons stored locally", store.count()?);
            for beacon in store.query_all().take(limit) {
                let beacon = beacon?;
                println!(
                    "  {}  {} {}/{}  {}  updated {}",
                    beacon.id,
                    beacon.uuid,
                    beacon.major,
                    beacon.minor,
                    beacon.description,
                    beacon.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
            }
        }
    }

    Ok(())
}

/// Show cursors.
fn cmd_cursors(config: &GeoSyncConfig) -> Result<()> {
    let db = open_database(config)?;
    println!("Replica schema version {}", db.schema_version()?);
    let cursors = SqliteCursorStore::new(db);
    let entries = cursors.entries()?;

    if entries.is_empty() {
        println!("No cursors stored; the next session syncs everything.");
    } else {
        for (key, cursor) in entries {
            println!("  {:<12} {}", key, cursor);
        }
    }

    Ok(())
}

/// Clear cursors.
fn cmd_reset(config: &GeoSyncConfig) -> Result<()> {
    let cursors = SqliteCursorStore::new(open_database(config)?);
    cursors.clear_all().context("Failed to clear cursors")?;
    println!("Cursors cleared; the next session performs a full resync.");
    Ok(())
}

/// Print the configuration.
fn cmd_config(config: &GeoSyncConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("***".to_string());
    }
    println!("{}", shown.to_json()?);
    Ok(())
}
