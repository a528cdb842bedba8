//! Kassa Server
//!
//! Hosts the settlement webhooks and runs the background processors that
//! reconcile payouts, poll counterparties and advance exchanges.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, LoadedConfig, get_database_url};
use kassa_core::config::SettingsHandle;
use kassa_core::events::{ChannelNotifier, NotificationReceiver, Notifier, notification_channel};
use kassa_core::processors::{
    ExchangeSweeper, NotificationDispatcher, OfferingPoller, TransferReconciler,
};
use kassa_core::store::{MemoryStore, PgStore};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::{AppState, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Kassa - wallet ledger, payout settlement and currency exchange routing
#[derive(Parser, Debug)]
#[command(name = "kassa-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./kassa.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep all state in memory instead of Postgres (development only)
    #[arg(long, default_value = "false")]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting kassa-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let settings = SettingsHandle::new(loaded_config.currency_settings());
    let (notification_tx, notification_rx) = notification_channel();
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::new(notification_tx));

    let (services, db_pool) = if args.memory {
        tracing::warn!("Running with in-memory storage; all state is lost on exit");
        let store = Arc::new(MemoryStore::new());
        (
            Services::build(store, &loaded_config, settings.clone(), notifier)?,
            None,
        )
    } else {
        let database_url = get_database_url().map_err(|e| {
            tracing::error!("DATABASE_URL environment variable not set");
            e
        })?;

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

        let store = Arc::new(PgStore::new(db_pool.clone()));
        (
            Services::build(store, &loaded_config, settings.clone(), notifier)?,
            Some(db_pool),
        )
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut processors = spawn_processors(&services, &loaded_config, notification_rx, shutdown_rx);

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(settings, config_loader);

    let router = build_router(AppState::new(services.pipeline.clone()));

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_signal()).await;

    reload_notify.notify_one();
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("All processors already stopped");
    }
    while let Some(joined) = processors.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Processor task panicked");
        }
    }

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

fn spawn_processors(
    services: &Services,
    config: &LoadedConfig,
    notification_rx: NotificationReceiver,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    tasks.spawn(
        TransferReconciler::new(
            services.pipeline.clone(),
            config.settlement.reconcile_interval(),
            shutdown_rx.clone(),
        )
        .run(),
    );
    tasks.spawn(
        OfferingPoller::new(
            services.router.clone(),
            config.exchange.poll_interval(),
            shutdown_rx.clone(),
        )
        .run(),
    );
    tasks.spawn(
        ExchangeSweeper::new(
            services.router.clone(),
            config.exchange.sweep_interval(),
            shutdown_rx.clone(),
        )
        .run(),
    );
    tasks.spawn(
        NotificationDispatcher::new(config.notifications.clone(), notification_rx, shutdown_rx)
            .run(),
    );
    tasks
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
