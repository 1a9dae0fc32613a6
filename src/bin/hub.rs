use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use client_monitoring::{
    config::{Config, StorageConfig, read_config_file},
    hub::MonitoringHub,
    notify,
    storage::{MemoryStore, MonitoringStore},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: String,

    /// Log at trace level
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    dotenv::dotenv().ok();

    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("client_monitoring", level),
        ("monitoring_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn MonitoringStore>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory storage, history is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let store = client_monitoring::storage::SqliteStore::new(&path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = open_store(&config).await?;
    let notifiers = notify::from_config(&config.notifications);
    let hub = MonitoringHub::start(&config, store.clone(), notifiers).await?;

    #[cfg(feature = "api")]
    {
        use client_monitoring::api::{ApiServerConfig, ApiState, spawn_api_server};

        let api_config = ApiServerConfig::from_config(&config.api.clone().with_env_overrides())?;
        let state = ApiState::new(hub.control().clone(), store);
        let addr = spawn_api_server(api_config, state).await?;
        info!("operator API available at http://{addr}/api/v1");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal");

    hub.shutdown().await
}
