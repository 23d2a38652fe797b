use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub events_published_total: IntCounterVec,
    pub deliveries_enqueued_total: IntCounterVec,
    pub deliveries_outcome_total: IntCounterVec,
    pub dead_letters_total: IntCounterVec,

    pub http_request_duration_seconds: HistogramVec,
    pub delivery_latency_ms: HistogramVec,

    pub dependency_up: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new("harborhook_events_published_total", "Total events published"),
            &["tenant_id"],
        )
        .expect("metric");

        let deliveries_enqueued_total = IntCounterVec::new(
            Opts::new("harborhook_deliveries_enqueued_total", "Total delivery tasks enqueued"),
            &["tenant_id"],
        )
        .expect("metric");

        let deliveries_outcome_total = IntCounterVec::new(
            Opts::new("harborhook_deliveries_outcome_total", "Delivery attempts by outcome"),
            &["outcome"],
        )
        .expect("metric");

        let dead_letters_total = IntCounterVec::new(
            Opts::new("harborhook_dead_letters_total", "Deliveries moved to the dead-letter queue"),
            &["tenant_id"],
        )
        .expect("metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("harborhook_http_request_duration_seconds", "HTTP request duration seconds"),
            &["path", "method", "status"],
        )
        .expect("metric");

        let delivery_latency_ms = HistogramVec::new(
            HistogramOpts::new("harborhook_delivery_latency_ms", "Delivery attempt latency in milliseconds"),
            &["outcome"],
        )
        .expect("metric");

        let dependency_up = IntGaugeVec::new(
            Opts::new("harborhook_dependency_up", "Dependency up gauge"),
            &["dep"],
        )
        .expect("metric");

        registry.register(Box::new(events_published_total.clone())).unwrap();
        registry.register(Box::new(deliveries_enqueued_total.clone())).unwrap();
        registry.register(Box::new(deliveries_outcome_total.clone())).unwrap();
        registry.register(Box::new(dead_letters_total.clone())).unwrap();
        registry.register(Box::new(http_request_duration_seconds.clone())).unwrap();
        registry.register(Box::new(delivery_latency_ms.clone())).unwrap();
        registry.register(Box::new(dependency_up.clone())).unwrap();

        Self {
            registry,
            events_published_total,
            deliveries_enqueued_total,
            deliveries_outcome_total,
            dead_letters_total,
            http_request_duration_seconds,
            delivery_latency_ms,
            dependency_up,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
