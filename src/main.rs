use clap::Parser;
use miette::{IntoDiagnostic, Result};
use orderflow::application::orchestrator::OrderOrchestrator;
use orderflow::domain::ports::{MessageBus, SharedBus, SharedOrderStore};
use orderflow::infrastructure::in_memory::InMemoryOrderStore;
use orderflow::infrastructure::nats::NatsBus;
use orderflow::interfaces::listener::OrderListener;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Order fulfillment service", long_about = None)]
struct Cli {
    /// NATS server URLs, repeatable or comma separated
    #[arg(long = "nats-url", default_value = "nats://localhost:4222", value_delimiter = ',')]
    nats_urls: Vec<String>,

    /// Path to persistent order database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store: SharedOrderStore = match cli.db_path {
        Some(path) => open_persistent(path)?,
        None => Arc::new(InMemoryOrderStore::new()),
    };

    let bus: SharedBus = Arc::new(NatsBus::connect(&cli.nats_urls).await.into_diagnostic()?);
    info!(servers = cli.nats_urls.join(","), "connected to NATS");

    let orchestrator = Arc::new(OrderOrchestrator::new(store, bus.clone()));
    let listener = OrderListener::new(orchestrator, bus.clone());

    tokio::select! {
        result = listener.run() => result.into_diagnostic()?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    bus.close().await.into_diagnostic()?;
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: PathBuf) -> Result<SharedOrderStore> {
    use orderflow::infrastructure::rocksdb::RocksDbOrderStore;
    let store = RocksDbOrderStore::open(path).into_diagnostic()?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_path: PathBuf) -> Result<SharedOrderStore> {
    miette::bail!("this build has no persistent storage; rebuild with --features storage-rocksdb")
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
