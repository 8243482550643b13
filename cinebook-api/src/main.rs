use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cinebook_api::{app, worker, AppState};
use cinebook_core::{MemoryLockStore, SeatLockManager, SeatLockStore, SystemClock};
use cinebook_store::app_config::{Config, StoreBackend};
use cinebook_store::RedisLockStore;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "cinebook_api=debug,cinebook_core=debug,cinebook_store=debug,tower_http=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Cinebook seat lock service on port {}", config.server.port);

    let store: Arc<dyn SeatLockStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory seat lock store");
            Arc::new(MemoryLockStore::new())
        }
        StoreBackend::Redis => {
            let redis = RedisLockStore::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;
            Arc::new(redis)
        }
    };

    let manager = SeatLockManager::new(store, Arc::new(SystemClock), config.locks.ttl_seconds)
        .context("Invalid lock TTL")?;
    let app_state = AppState::new(manager, config.events.channel_capacity)
        .context("Failed to register metrics")?;
    let app_state = with_event_bus(app_state, &config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(worker::start_cleanup_worker(
        app_state.clone(),
        Duration::from_secs(config.locks.cleanup_interval_seconds.max(1)),
        shutdown_rx,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    Ok(())
}

#[cfg(feature = "kafka")]
fn with_event_bus(state: AppState, config: &Config) -> anyhow::Result<AppState> {
    match &config.kafka.brokers {
        Some(brokers) => {
            let producer = cinebook_store::EventProducer::new(brokers)
                .context("Failed to create Kafka producer")?;
            tracing::info!("Publishing seat lock events to Kafka at {}", brokers);
            Ok(state.with_publisher(Arc::new(producer)))
        }
        None => Ok(state),
    }
}

#[cfg(not(feature = "kafka"))]
fn with_event_bus(state: AppState, config: &Config) -> anyhow::Result<AppState> {
    if config.kafka.brokers.is_some() {
        tracing::warn!(
            "kafka.brokers is set but this build has no Kafka support; events stay local"
        );
    }
    Ok(state)
}
