//! Axum handlers for the ingest/fanout API (§4.1): CreateEndpoint,
//! CreateSubscription, PublishEvent, GetDeliveryStatus, ReplayDelivery,
//! ListDeadLetter.

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::IngestError;
use crate::ingest::fanout::{self, PublishEventRequest};
use crate::middleware::tracing::get_trace_id;
use crate::model::{DeadLetter, Delivery, Endpoint, EndpointView, Subscription};
use crate::state::AppState;
use crate::store::{DeliveryStatusFilter, NewEndpoint, NewSubscription};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/endpoints", post(create_endpoint))
        .route("/v1/subscriptions", post(create_subscription))
        .route("/v1/events", post(publish_event))
        .route("/v1/events/{event_id}/deliveries", get(get_delivery_status))
        .route("/v1/deliveries/{id}/replay", post(replay_delivery))
        .route("/v1/dead-letters", get(list_dead_letters))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.ping().await.is_ok();
    let bus_ok = state.bus.is_connected();
    if store_ok && bus_ok {
        (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ok": false, "store": store_ok, "bus": bus_ok })),
        )
            .into_response()
    }
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub tenant_id: String,
    pub url: String,
    pub secret: Option<String>,
    pub headers: Option<serde_json::Value>,
    pub rate_per_sec: Option<i32>,
}

/// 32 cryptographically random bytes, URL-safe base64 encoded, per §3's
/// endpoint secret generation rule.
fn generate_secret() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn create_endpoint(
    State(state): State<AppState>,
    Json(req): Json<CreateEndpointRequest>,
) -> Result<Json<EndpointView>, IngestError> {
    if req.tenant_id.is_empty() {
        return Err(IngestError::Validation("tenant_id must not be empty".into()));
    }
    if req.url.is_empty() || !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
        return Err(IngestError::Validation("url must be an absolute http(s) URL".into()));
    }

    let secret = match req.secret {
        Some(s) if !s.is_empty() => s,
        _ => generate_secret(),
    };

    let endpoint: Endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            tenant_id: req.tenant_id,
            url: req.url,
            secret,
            headers: req.headers,
            rate_per_sec: req.rate_per_sec,
        })
        .await?;

    Ok(Json(endpoint.into()))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub tenant_id: String,
    pub event_type: String,
    pub endpoint_id: String,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>, IngestError> {
    if req.tenant_id.is_empty() {
        return Err(IngestError::Validation("tenant_id must not be empty".into()));
    }
    if req.event_type.is_empty() {
        return Err(IngestError::Validation("event_type must not be empty".into()));
    }
    if req.endpoint_id.is_empty() {
        return Err(IngestError::Validation("endpoint_id must not be empty".into()));
    }

    let endpoint = state
        .store
        .get_endpoint(&req.tenant_id, &req.endpoint_id)
        .await?;
    if endpoint.is_none() {
        return Err(IngestError::NotFound);
    }

    let subscription = state
        .store
        .create_subscription(NewSubscription {
            tenant_id: req.tenant_id,
            event_type: req.event_type,
            endpoint_id: req.endpoint_id,
        })
        .await?;

    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct PublishEventBody {
    pub tenant_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PublishEventResponseBody {
    pub event_id: String,
    pub fanout_count: usize,
}

async fn publish_event(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Json<PublishEventResponseBody>, IngestError> {
    let trace_id = get_trace_id(req.extensions());
    let mut trace_headers = HashMap::new();
    trace_headers.insert(crate::middleware::tracing::TRACE_ID_HEADER.to_string(), trace_id);

    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| IngestError::Validation(format!("failed to read request body: {e}")))?;
    let body: PublishEventBody = serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::Validation(format!("invalid request body: {e}")))?;

    let result = fanout::publish_event(
        &state,
        PublishEventRequest {
            tenant_id: body.tenant_id,
            event_type: body.event_type,
            payload: body.payload,
            idempotency_key: body.idempotency_key,
            occurred_at: body.occurred_at,
            trace_headers,
        },
    )
    .await?;

    Ok(Json(PublishEventResponseBody {
        event_id: result.event_id,
        fanout_count: result.fanout_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryStatusQuery {
    pub endpoint_id: Option<String>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
}

async fn get_delivery_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(q): Query<DeliveryStatusQuery>,
) -> Result<Json<Vec<Delivery>>, IngestError> {
    let deliveries = state
        .store
        .deliveries_for_event(
            &event_id,
            DeliveryStatusFilter {
                endpoint_id: q.endpoint_id,
                from: q.from,
                to: q.to,
                limit: q.limit.unwrap_or(10),
            },
        )
        .await?;

    Ok(Json(deliveries))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplayRequest {
    pub reason: Option<String>,
}

async fn replay_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ReplayRequest>>,
) -> Result<Json<Delivery>, IngestError> {
    let reason = body.and_then(|Json(r)| r.reason);

    let source = state.store.get_delivery(&id).await?.ok_or(IngestError::NotFound)?;

    let endpoint = state
        .store
        .get_endpoint_by_id(&source.endpoint_id)
        .await?
        .ok_or_else(|| IngestError::Validation("endpoint no longer exists, cannot replay".into()))?;

    let event = state
        .store
        .get_event(&source.event_id)
        .await?
        .ok_or(IngestError::NotFound)?;

    let replay = state
        .store
        .create_replay(&id, reason)
        .await?
        .ok_or(IngestError::NotFound)?;

    let task = crate::model::TaskEnvelope {
        delivery_id: replay.id.clone(),
        event_id: event.id.clone(),
        tenant_id: event.tenant_id.clone(),
        endpoint_id: endpoint.id.clone(),
        endpoint_url: endpoint.url.clone(),
        event_type: event.event_type.clone(),
        payload: event.payload.clone(),
        attempt: 0,
        published_at: chrono::Utc::now(),
        trace_headers: HashMap::new(),
    };

    let payload = serde_json::to_vec(&task)
        .map_err(|e| IngestError::Validation(format!("failed to serialize replay task: {e}")))?;
    state.bus.publish("deliveries", payload).await?;

    Ok(Json(replay))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub endpoint_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterEntryView {
    pub dead_letter: DeadLetter,
    pub delivery: Delivery,
}

async fn list_dead_letters(
    State(state): State<AppState>,
    Query(q): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterEntryView>>, IngestError> {
    let entries = state
        .store
        .list_dead_letters(q.endpoint_id.as_deref(), q.limit.unwrap_or(10))
        .await?;

    Ok(Json(
        entries
            .into_iter()
            .map(|e| DeadLetterEntryView {
                dead_letter: e.dead_letter,
                delivery: e.delivery,
            })
            .collect(),
    ))
}
