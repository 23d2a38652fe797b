//! Implements `PublishEvent` (§4.1): idempotent event insertion, subscription
//! resolution, batched delivery-row creation, and one broker publish per
//! delivery row.

use crate::errors::IngestError;
use crate::model::TaskEnvelope;
use crate::state::AppState;
use crate::store::NewEvent;
use chrono::Utc;
use std::collections::HashMap;

pub struct PublishEventRequest {
    pub tenant_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: Option<chrono::DateTime<Utc>>,
    pub trace_headers: HashMap<String, String>,
}

pub struct PublishEventResponse {
    pub event_id: String,
    pub fanout_count: usize,
}

pub async fn publish_event(
    state: &AppState,
    req: PublishEventRequest,
) -> Result<PublishEventResponse, IngestError> {
    if req.tenant_id.is_empty() {
        return Err(IngestError::Validation("tenant_id must not be empty".into()));
    }
    if req.event_type.is_empty() {
        return Err(IngestError::Validation("event_type must not be empty".into()));
    }
    if req.payload.is_null() {
        return Err(IngestError::Validation("payload must not be null".into()));
    }

    let insert_result = state
        .store
        .insert_event(NewEvent {
            tenant_id: req.tenant_id.clone(),
            event_type: req.event_type.clone(),
            payload: req.payload.clone(),
            idempotency_key: req.idempotency_key.clone(),
            occurred_at: req.occurred_at,
        })
        .await?;

    if !insert_result.inserted && insert_result.has_deliveries {
        // Duplicate idempotent publish: zero fanout, original event id.
        return Ok(PublishEventResponse {
            event_id: insert_result.event.id,
            fanout_count: 0,
        });
    }

    let subscriptions = state
        .store
        .subscriptions_for(&req.tenant_id, &req.event_type)
        .await?;

    if subscriptions.is_empty() {
        return Ok(PublishEventResponse {
            event_id: insert_result.event.id,
            fanout_count: 0,
        });
    }

    let endpoint_ids: Vec<String> = subscriptions.iter().map(|s| s.endpoint_id.clone()).collect();

    let deliveries = state
        .store
        .create_deliveries(&insert_result.event.id, &endpoint_ids)
        .await?;

    let mut published = 0usize;
    for (delivery, subscription) in deliveries.iter().zip(subscriptions.iter()) {
        let endpoint = state
            .store
            .get_endpoint_by_id(&subscription.endpoint_id)
            .await?;
        let Some(endpoint) = endpoint else {
            tracing::error!(
                endpoint_id = %subscription.endpoint_id,
                "subscription references an endpoint that no longer exists"
            );
            continue;
        };

        let task = TaskEnvelope {
            delivery_id: delivery.id.clone(),
            event_id: insert_result.event.id.clone(),
            tenant_id: req.tenant_id.clone(),
            endpoint_id: endpoint.id.clone(),
            endpoint_url: endpoint.url.clone(),
            event_type: req.event_type.clone(),
            payload: req.payload.clone(),
            attempt: 0,
            published_at: Utc::now(),
            trace_headers: req.trace_headers.clone(),
        };

        let payload = serde_json::to_vec(&task).map_err(|e| {
            IngestError::Validation(format!("failed to serialize task envelope: {e}"))
        })?;

        match state.bus.publish("deliveries", payload).await {
            Ok(()) => {
                published += 1;
                state
                    .metrics
                    .deliveries_enqueued_total
                    .with_label_values(&[&req.tenant_id])
                    .inc();
            }
            Err(e) => {
                // The row stays `queued`; an operator can replay it.
                tracing::error!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "failed to publish delivery task, row remains queued"
                );
            }
        }
    }

    state
        .metrics
        .events_published_total
        .with_label_values(&[&req.tenant_id])
        .inc();

    Ok(PublishEventResponse {
        event_id: insert_result.event.id,
        fanout_count: published,
    })
}
