use crate::config::Config;
use crate::metrics::Metrics;
use crate::store::DeliveryStore;
use event_bus::EventBus;
use std::sync::Arc;

/// Shared state for the ingest API's handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DeliveryStore>,
    pub bus: Arc<dyn EventBus>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}
