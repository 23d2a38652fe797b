//! End-to-end scenario tests against the in-memory store and bus, driving
//! HTTP delivery against a local mock server instead of a real endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_bus::{EventBus, InMemoryBus};
use futures::StreamExt;
use harborhook::config::Config;
use harborhook::ingest::fanout::{self, PublishEventRequest};
use harborhook::metrics::Metrics;
use harborhook::model::DeliveryStatus;
use harborhook::state::AppState;
use harborhook::store::{DeliveryStore, DeliveryStatusFilter, MemoryStore, NewEndpoint, NewEvent, NewSubscription};
use harborhook::worker::process::{process_task, ProcessResult};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

fn test_config() -> Config {
    Config {
        database_url: "unused".to_string(),
        bus_type: "inmemory".to_string(),
        nats_url: "unused".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        max_attempts: 5,
        backoff_schedule: vec![Duration::from_millis(5), Duration::from_millis(10)],
        backoff_jitter_pct: 0.0,
        publish_dlq_topic: false,
        http_client_timeout: Duration::from_secs(2),
        worker_max_inflight: 100,
        signing_leeway_seconds: 300,
    }
}

fn test_state_with_config(cfg: Config) -> AppState {
    AppState {
        store: Arc::new(MemoryStore::new()),
        bus: Arc::new(InMemoryBus::new()),
        metrics: Arc::new(Metrics::new()),
        config: Arc::new(cfg),
    }
}

fn test_state() -> AppState {
    test_state_with_config(test_config())
}

fn publish_request(event_type: &str, payload: serde_json::Value) -> PublishEventRequest {
    PublishEventRequest {
        tenant_id: "tenant-1".to_string(),
        event_type: event_type.to_string(),
        payload,
        idempotency_key: None,
        occurred_at: None,
        trace_headers: Default::default(),
    }
}

type TaskStream = futures::stream::BoxStream<'static, event_bus::BusMessage>;

/// Subscribes before any publish happens — a message broadcast before a
/// receiver exists is dropped, so the stream must be obtained first.
async fn subscribe_deliveries(bus: &dyn EventBus) -> TaskStream {
    bus.subscribe("deliveries").await.unwrap()
}

async fn next_task(stream: &mut TaskStream) -> event_bus::BusMessage {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for delivery task")
        .expect("bus stream ended")
}

#[tokio::test]
async fn happy_path_delivers_on_first_attempt() {
    let state = test_state();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: server.uri(),
            secret: "s3cr3t".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();

    state
        .store
        .create_subscription(NewSubscription {
            tenant_id: "tenant-1".to_string(),
            event_type: "user.created".to_string(),
            endpoint_id: endpoint.id.clone(),
        })
        .await
        .unwrap();

    let mut stream = subscribe_deliveries(&*state.bus).await;

    let result = fanout::publish_event(&state, publish_request("user.created", serde_json::json!({"id": 1})))
        .await
        .unwrap();
    assert_eq!(result.fanout_count, 1);

    let msg = next_task(&mut stream).await;
    let client = reqwest::Client::new();
    let outcome = process_task(&state, &client, msg.clone()).await;
    assert!(matches!(outcome, ProcessResult::Delivered));

    let task: harborhook::model::TaskEnvelope = serde_json::from_slice(&msg.payload).unwrap();
    let delivery = state.store.get_delivery(&task.delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempt, 1);
}

#[tokio::test]
async fn duplicate_idempotent_publish_has_zero_fanout() {
    let state = test_state();

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            secret: "s3cr3t".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();

    state
        .store
        .create_subscription(NewSubscription {
            tenant_id: "tenant-1".to_string(),
            event_type: "user.created".to_string(),
            endpoint_id: endpoint.id.clone(),
        })
        .await
        .unwrap();

    let mut req1 = publish_request("user.created", serde_json::json!({"id": 1}));
    req1.idempotency_key = Some("order-42".to_string());
    let first = fanout::publish_event(&state, req1).await.unwrap();
    assert_eq!(first.fanout_count, 1);

    let mut req2 = publish_request("user.created", serde_json::json!({"id": 1}));
    req2.idempotency_key = Some("order-42".to_string());
    let second = fanout::publish_event(&state, req2).await.unwrap();

    assert_eq!(second.fanout_count, 0);
    assert_eq!(second.event_id, first.event_id);
}

struct FlakyThenOk {
    calls: AtomicUsize,
}

impl Respond for FlakyThenOk {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

#[tokio::test]
async fn retry_then_succeed_eventually_delivers() {
    let state = test_state();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FlakyThenOk { calls: AtomicUsize::new(0) })
        .mount(&server)
        .await;

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: server.uri(),
            secret: "s3cr3t".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();
    state
        .store
        .create_subscription(NewSubscription {
            tenant_id: "tenant-1".to_string(),
            event_type: "order.paid".to_string(),
            endpoint_id: endpoint.id.clone(),
        })
        .await
        .unwrap();

    let mut stream = subscribe_deliveries(&*state.bus).await;
    fanout::publish_event(&state, publish_request("order.paid", serde_json::json!({"id": 2})))
        .await
        .unwrap();
    let msg = next_task(&mut stream).await;
    let task: harborhook::model::TaskEnvelope = serde_json::from_slice(&msg.payload).unwrap();

    let client = reqwest::Client::new();

    let first = process_task(&state, &client, msg).await;
    assert!(matches!(first, ProcessResult::Requeued));

    let requeued_msg = next_task(&mut stream).await;
    let requeued_task: harborhook::model::TaskEnvelope = serde_json::from_slice(&requeued_msg.payload).unwrap();
    assert_eq!(requeued_task.attempt, 1);

    let second = process_task(&state, &client, requeued_msg).await;
    assert!(matches!(second, ProcessResult::Delivered));

    let delivery = state.store.get_delivery(&task.delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempt, 2);
}

#[tokio::test]
async fn exhausting_retries_dead_letters_the_delivery() {
    let mut cfg = test_config();
    cfg.max_attempts = 1;
    let state = test_state_with_config(cfg);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: server.uri(),
            secret: "s3cr3t".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();
    state
        .store
        .create_subscription(NewSubscription {
            tenant_id: "tenant-1".to_string(),
            event_type: "order.failed".to_string(),
            endpoint_id: endpoint.id.clone(),
        })
        .await
        .unwrap();

    let mut stream = subscribe_deliveries(&*state.bus).await;
    fanout::publish_event(&state, publish_request("order.failed", serde_json::json!({"id": 3})))
        .await
        .unwrap();
    let msg = next_task(&mut stream).await;
    let task: harborhook::model::TaskEnvelope = serde_json::from_slice(&msg.payload).unwrap();

    let client = reqwest::Client::new();
    let result = process_task(&state, &client, msg).await;
    assert!(matches!(result, ProcessResult::DeadLettered));

    let delivery = state.store.get_delivery(&task.delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Dead);
    assert!(delivery.dlq_at.is_some());

    let dead_letters = state.store.list_dead_letters(None, 10).await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert!(dead_letters[0].dead_letter.reason.contains("max attempts reached (1)"));
}

#[tokio::test]
async fn replay_of_a_dead_lettered_delivery_creates_a_fresh_queued_row() {
    let state = test_state();

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            secret: "s3cr3t".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();

    let insert = state
        .store
        .insert_event(NewEvent {
            tenant_id: "tenant-1".to_string(),
            event_type: "order.failed".to_string(),
            payload: serde_json::json!({"id": 4}),
            idempotency_key: None,
            occurred_at: None,
        })
        .await
        .unwrap();

    let deliveries = state
        .store
        .create_deliveries(&insert.event.id, &[endpoint.id.clone()])
        .await
        .unwrap();
    let original = &deliveries[0];
    state
        .store
        .insert_dead_letter(&original.id, "max attempts reached (5)")
        .await
        .unwrap();

    let replay = state
        .store
        .create_replay(&original.id, Some("manual replay after fix".to_string()))
        .await
        .unwrap()
        .expect("source delivery exists");

    assert_eq!(replay.replay_of.as_deref(), Some(original.id.as_str()));
    assert_eq!(replay.status, DeliveryStatus::Queued);
    assert_eq!(replay.attempt, 0);
    assert_eq!(replay.event_id, original.event_id);
}

#[tokio::test]
async fn fanout_creates_one_delivery_per_subscribed_endpoint() {
    let state = test_state();

    let endpoint_a = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            secret: "s3cr3t-a".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();
    let endpoint_b = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: "tenant-1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            secret: "s3cr3t-b".to_string(),
            headers: None,
            rate_per_sec: None,
        })
        .await
        .unwrap();

    for endpoint_id in [&endpoint_a.id, &endpoint_b.id] {
        state
            .store
            .create_subscription(NewSubscription {
                tenant_id: "tenant-1".to_string(),
                event_type: "invoice.created".to_string(),
                endpoint_id: endpoint_id.clone(),
            })
            .await
            .unwrap();
    }

    let result = fanout::publish_event(&state, publish_request("invoice.created", serde_json::json!({"id": 5})))
        .await
        .unwrap();

    assert_eq!(result.fanout_count, 2);

    let deliveries = state
        .store
        .deliveries_for_event(
            &result.event_id,
            DeliveryStatusFilter {
                endpoint_id: None,
                from: None,
                to: None,
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 2);
}
