use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harborhook::config::Config;
use harborhook::metrics::Metrics;
use harborhook::state::AppState;
use harborhook::store::PostgresStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harborhook=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cfg = Config::from_env()?;
    tracing::info!("worker config loaded");

    let store = PostgresStore::connect(&cfg.database_url).await?;
    tracing::info!("db connected");

    let bus: Arc<dyn event_bus::EventBus> = match cfg.bus_type.as_str() {
        "nats" => {
            let client = async_nats::connect(&cfg.nats_url).await?;
            tracing::info!(url = %cfg.nats_url, "nats connected");
            Arc::new(event_bus::NatsBus::new(client))
        }
        _ => {
            tracing::warn!("running with the in-memory event bus, not for production use");
            Arc::new(event_bus::InMemoryBus::new())
        }
    };

    let http_client = reqwest::Client::builder()
        .timeout(cfg.http_client_timeout)
        .build()?;

    let metrics = Arc::new(Metrics::new());
    let config = Arc::new(cfg);

    let state = AppState {
        store: Arc::new(store),
        bus,
        metrics,
        config,
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let shutdown_rx = shutdown_tx.subscribe();

    let worker_handle = tokio::spawn(harborhook::worker::run(state, http_client, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    // Give the in-flight semaphore permits a moment to drain before exit.
    let _ = tokio::time::timeout(Duration::from_secs(10), worker_handle).await;

    Ok(())
}
