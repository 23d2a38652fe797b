use axum::middleware::from_fn;
use axum::middleware::from_fn_with_state;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harborhook::config::Config;
use harborhook::ingest::routes;
use harborhook::metrics::Metrics;
use harborhook::middleware::metrics::{metrics_middleware, MetricsMiddlewareState};
use harborhook::middleware::tracing::trace_id_middleware;
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
    tracing::info!("config loaded");

    let store = PostgresStore::connect(&cfg.database_url).await?;
    store.run_migrations().await?;
    tracing::info!("db connected + migrations applied");

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

    let metrics = Arc::new(Metrics::new());
    let config = Arc::new(cfg.clone());

    let state = AppState {
        store: Arc::new(store),
        bus,
        metrics: metrics.clone(),
        config,
    };

    let app = routes::router(state)
        .layer(from_fn_with_state(
            MetricsMiddlewareState { metrics },
            metrics_middleware,
        ))
        .layer(from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
    tokio::time::sleep(Duration::from_millis(100)).await;
}
