//! Preconfirmation Settlement Oracle Server
//!
//! Watches the block tracker for L1 winners, decides for every commitment
//! whether it was honored, and posts the outcomes to the oracle contract.

mod config;
mod server;
mod shutdown;
mod state;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use config::{ConfigLoader, get_database_url, get_private_key};
use futures_util::future::join_all;
use preconf_core::chain::{
    BlockTrackerClient, L1Client, PreconfStoreClient, RpcLogSource, SettlementAccount,
};
use preconf_core::dispatcher::{ContractInterface, EventDispatcher};
use preconf_core::processors::{Settler, Transactor, Updater, WinnerRecorder};
use preconf_core::storage::PgStore;
use server::{build_router, run_server};
use shutdown::spawn_signal_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long processors get to finish after shutdown is signaled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Preconfirmation settlement oracle
#[derive(Parser, Debug)]
#[command(name = "preconf-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./preconf-oracle.toml")]
    config: PathBuf,

    /// Override the health endpoint listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting preconf-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Secrets come from the environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;
    let signer: PrivateKeySigner = get_private_key()?.trim().parse().map_err(|e| {
        tracing::error!("Invalid ORACLE_PRIVATE_KEY: {}", e);
        e
    })?;
    let account = signer.address();

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Connect to both chains
    tracing::info!("Connecting to settlement chain at {}", config.settlement_rpc);
    let settlement = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect(config.settlement_rpc.as_str())
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to settlement chain: {}", e);
            e
        })?
        .erased();
    tracing::info!("Connecting to L1 at {}", config.l1_rpc);
    let l1 = ProviderBuilder::new()
        .connect(config.l1_rpc.as_str())
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to L1: {}", e);
            e
        })?
        .erased();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let store = Arc::new(PgStore::new(db_pool.clone()));

    let transactor = Arc::new(
        Transactor::new(
            Arc::new(SettlementAccount::new(settlement.clone(), account)),
            store.clone(),
            config.transactor,
            shutdown_rx.clone(),
        )
        .await?,
    );

    let dispatcher = Arc::new(EventDispatcher::new(
        vec![(
            config.contracts.block_tracker,
            ContractInterface::block_tracker(),
        )],
        Arc::new(RpcLogSource::new(settlement.clone())),
        store.clone(),
        config.listener.start_block,
    ));

    // Every subscriber registers before the dispatcher starts reading logs.
    let recorder = WinnerRecorder::new(
        &dispatcher,
        store.clone(),
        config.updater.max_retry_exponent,
    )?;
    let settler = Settler::new(
        &dispatcher,
        store.clone(),
        transactor.clone(),
        config.contracts.oracle,
    )?;
    let updater = Updater::new(
        store.clone(),
        Arc::new(L1Client::new(l1)),
        Arc::new(PreconfStoreClient::new(
            config.contracts.preconf_store,
            settlement.clone(),
        )),
        Arc::new(BlockTrackerClient::new(
            config.contracts.block_tracker,
            settlement,
        )),
        config.updater,
    );

    let handles = vec![
        spawn_processor("transactor", shutdown_tx.clone(), {
            let transactor = transactor.clone();
            let shutdown_rx = shutdown_rx.clone();
            async move {
                transactor.run(shutdown_rx).await;
                Ok::<_, Infallible>(())
            }
        }),
        spawn_processor("updater", shutdown_tx.clone(), {
            let shutdown_rx = shutdown_rx.clone();
            async move {
                updater.run(shutdown_rx).await;
                Ok::<_, Infallible>(())
            }
        }),
        spawn_processor(
            "winner_recorder",
            shutdown_tx.clone(),
            recorder.run(shutdown_rx.clone()),
        ),
        spawn_processor(
            "settler",
            shutdown_tx.clone(),
            settler.run(shutdown_rx.clone()),
        ),
        spawn_processor("dispatcher", shutdown_tx.clone(), {
            let dispatcher = dispatcher.clone();
            let shutdown_rx = shutdown_rx.clone();
            async move { dispatcher.run(shutdown_rx).await }
        }),
    ];

    // Listens for SIGTERM and SIGINT
    spawn_signal_handler(shutdown_tx.clone());

    // Run the health server until shutdown
    let router = build_router(AppState::new(store, transactor));
    let result = run_server(router, config.listen, shutdown_rx).await;

    // The server may also have stopped on its own
    shutdown_tx.send_replace(true);

    tracing::info!("Waiting for processors to stop...");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::warn!("Processors did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Spawn a processor task. A processor that fails shuts the whole server down.
fn spawn_processor<F, E>(
    name: &'static str,
    shutdown_tx: Arc<watch::Sender<bool>>,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(()) => tracing::info!(processor = name, "Processor stopped"),
            Err(e) => {
                tracing::error!(processor = name, error = %e, "Processor failed, shutting down");
                shutdown_tx.send_replace(true);
            }
        }
    })
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,alloy_transport=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
