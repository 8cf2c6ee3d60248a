//! blockpub: publishes buffered job output to the data catalog.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod routes;
mod scheduler;
mod state;

use blockpub_catalog::{CatalogClient, HttpCatalogClient};
use blockpub_core::PublisherConfig;
use blockpub_runtime::PublishCycle;
use blockpub_store::BufferStore;
use scheduler::CycleLoop;
use state::AppState;

fn resolve_config_path() -> PathBuf {
    std::env::var("BLOCKPUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/blockpub.json"))
}

fn load_config() -> anyhow::Result<PublisherConfig> {
    let path = resolve_config_path();
    let config = PublisherConfig::load(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("run") => run().await,
        Some("status") => {
            let config = load_config()?;
            let store = BufferStore::open(&config.data_dir)?;
            println!("{}", serde_json::to_string_pretty(&store.status_snapshot()?)?);
            Ok(())
        }
        Some("--validate") | Some("validate") => match load_config() {
            Ok(config) => {
                println!("Configuration OK");
                println!("  catalog:        {}", config.catalog.endpoint);
                println!("  block timeout:  {}s", config.block_open_timeout_secs);
                println!("  concurrency:    {}", config.group_concurrency_limit);
                println!("  cycle interval: {}s", config.cycle_interval_secs);
                println!("  database:       {}", config.db_path().display());
                Ok(())
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        Some("--help") | Some("-h") | Some("help") => {
            println!("blockpub: buffered block publisher");
            println!();
            println!("Usage: blockpub [command]");
            println!();
            println!("Commands:");
            println!("  run (default)   Start the publication loop and status API");
            println!("  status          Print buffer counters as JSON");
            println!("  validate        Check configuration and exit");
            println!("  help            Show this help message");
            println!();
            println!("Config file: $BLOCKPUB_CONFIG (default data/blockpub.json)");
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}. Use 'blockpub help' for usage.", other);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    info!("Data directory: {}", config.data_dir.display());

    let store = Arc::new(
        BufferStore::open(&config.data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?,
    );
    let catalog: Arc<dyn CatalogClient> = Arc::new(HttpCatalogClient::new(&config.catalog)?);
    let cycle = Arc::new(PublishCycle::new(&config, store.clone(), catalog)?);

    let state = Arc::new(AppState::new(config.clone(), store));
    let cycle_loop = CycleLoop::start(cycle, state.clone(), config.cycle_interval());

    let app = routes::build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("blockpub status API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown requested, finishing the running group");
    cycle_loop.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
