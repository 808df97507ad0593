//! Ledger Core - double-entry ledger service
//!
//! Serves the HTTP API, publishes the transactional outbox to the ledger
//! event stream and consumes the payment stream.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_core::api::{self, AppState};
use ledger_core::bus::RedisStreamsBus;
use ledger_core::consumer::PaymentEventConsumer;
use ledger_core::outbox::OutboxPublisher;
use ledger_core::store::{LedgerStore, PgLedgerStore};
use ledger_core::{db, Config, LedgerMetrics};

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_core=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting ledger core");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool, config.clearing_account_id).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let metrics = LedgerMetrics::new()?;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let bus = Arc::new(RedisStreamsBus::connect(config.redis_streams()).await?);
    let state = AppState::new(Arc::clone(&store), metrics.clone());

    let shutdown = CancellationToken::new();

    let publisher = OutboxPublisher::with_config(
        Arc::clone(&store),
        bus.clone(),
        metrics.clone(),
        config.outbox_publisher(),
    )
    .start(shutdown.clone());

    let consumer = PaymentEventConsumer::new(
        bus,
        state.registry.clone(),
        state.processor.clone(),
        metrics,
        config.payment_consumer(),
    )
    .start(shutdown.clone());

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    shutdown.cancel();
    for (name, handle) in [("outbox publisher", publisher), ("payment consumer", consumer)] {
        if let Err(e) = handle.await {
            tracing::error!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
