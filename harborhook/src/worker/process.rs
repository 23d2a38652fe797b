//! The delivery worker's per-task loop (§4.2). One call to `process_task`
//! handles exactly one `TaskEnvelope`: deserialize, mark inflight, sign,
//! send, classify, apply the state transition, and either finalize or
//! requeue through the broker.

use crate::model::{DeliveryStatus, TaskEnvelope};
use crate::state::AppState;
use crate::state_machine::{self, dead_letter_reason};
use crate::worker::classify::send_and_classify;
use event_bus::BusMessage;

/// What happened to a task after `process_task` returned. The worker loop
/// uses this only for metrics/logging — every path already acknowledges or
/// requeues the message, there is no "undecided" outcome.
#[derive(Debug)]
pub enum ProcessResult {
    MalformedTask,
    MissingSecret,
    Delivered,
    Requeued,
    DeadLettered,
    TransitionRejected,
}

pub async fn process_task(state: &AppState, http_client: &reqwest::Client, msg: BusMessage) -> ProcessResult {
    // Step 1: deserialize. A malformed task is a terminal failure — it is
    // acknowledged, never requeued, and no delivery row is touched because
    // we have no delivery id to update.
    let task: TaskEnvelope = match serde_json::from_slice(&msg.payload) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "received malformed delivery task, dropping");
            return ProcessResult::MalformedTask;
        }
    };

    let span = tracing::info_span!(
        "delivery_attempt",
        delivery_id = %task.delivery_id,
        event_id = %task.event_id,
        endpoint_id = %task.endpoint_id,
        attempt = task.attempt,
    );
    let _enter = span.enter();

    // Step 3: mark inflight.
    let inflight_transition = state_machine::mark_inflight(task.attempt);
    if let Err(e) = state.store.apply_transition(&task.delivery_id, inflight_transition).await {
        tracing::error!(error = %e, "failed to mark delivery inflight");
        return ProcessResult::TransitionRejected;
    }

    // Step 4: fetch the endpoint secret.
    let secret = match state.store.get_endpoint_secret(&task.endpoint_id).await {
        Ok(Some(secret)) if !secret.is_empty() => secret,
        Ok(_) => {
            tracing::warn!("endpoint secret missing, failing delivery terminally");
            let transition = crate::state_machine::Transition {
                new_status: DeliveryStatus::Failed,
                attempt: task.attempt + 1,
                http_status: None,
                latency_ms: None,
                last_error: Some("endpoint_secret_missing".to_string()),
                dequeued_at: None,
                delivered_at: None,
                failed_at: Some(chrono::Utc::now()),
                dlq_at: None,
                should_requeue: false,
            };
            if let Err(e) = state.store.apply_transition(&task.delivery_id, transition).await {
                tracing::error!(error = %e, "failed to record missing-secret failure");
            }
            return ProcessResult::MissingSecret;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch endpoint secret");
            return ProcessResult::TransitionRejected;
        }
    };

    // Step 5: sign.
    let body = match serde_json::to_vec(&task.payload) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize task payload");
            return ProcessResult::MalformedTask;
        }
    };
    let timestamp = crate::signer::now_timestamp();
    let signature = crate::signer::sign(secret.as_bytes(), &body, &timestamp);

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-HarborHook-Timestamp".to_string(), timestamp),
        ("X-HarborHook-Signature".to_string(), signature),
    ];
    if let Some(trace_id) = task.trace_headers.get(crate::middleware::tracing::TRACE_ID_HEADER) {
        headers.push((crate::middleware::tracing::TRACE_ID_HEADER.to_string(), trace_id.clone()));
    }

    // Step 6-7: send and classify.
    let outcome = send_and_classify(http_client, &task.endpoint_url, &body, &headers).await;

    state
        .metrics
        .deliveries_outcome_total
        .with_label_values(&[outcome.outcome.as_str()])
        .inc();
    state
        .metrics
        .delivery_latency_ms
        .with_label_values(&[outcome.outcome.as_str()])
        .observe(outcome.latency_ms as f64);

    // Steps 8-9: apply the transition.
    let transition = match state_machine::apply(
        DeliveryStatus::Inflight,
        task.attempt,
        outcome.outcome,
        outcome.http_status,
        outcome.latency_ms,
        outcome.detail,
        state.config.max_attempts,
    ) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "illegal state transition, finalizing as acknowledged");
            return ProcessResult::TransitionRejected;
        }
    };

    let should_requeue = transition.should_requeue;
    let next_attempt = transition.attempt;
    let is_dead = transition.new_status == DeliveryStatus::Dead;
    let last_error = transition.last_error.clone();
    let http_status = transition.http_status;

    if let Err(e) = state.store.apply_transition(&task.delivery_id, transition).await {
        tracing::error!(error = %e, "failed to persist delivery transition");
        return ProcessResult::TransitionRejected;
    }

    if outcome.outcome.is_success() {
        return ProcessResult::Delivered;
    }

    if is_dead {
        let reason = dead_letter_reason(next_attempt, http_status, last_error.as_deref().unwrap_or(""));
        if let Err(e) = state.store.insert_dead_letter(&task.delivery_id, &reason).await {
            tracing::error!(error = %e, "failed to insert dead-letter row");
        }
        state
            .metrics
            .dead_letters_total
            .with_label_values(&[&task.tenant_id])
            .inc();

        if state.config.publish_dlq_topic {
            if let Ok(payload) = serde_json::to_vec(&task) {
                if let Err(e) = state.bus.publish("deliveries_dlq", payload).await {
                    tracing::warn!(error = %e, "best-effort dlq topic publish failed");
                }
            }
        }

        return ProcessResult::DeadLettered;
    }

    if should_requeue {
        let delay = crate::retry::delay(next_attempt as u32, &state.config.backoff_schedule, state.config.backoff_jitter_pct);
        let mut next_task = task;
        next_task.attempt = next_attempt;
        next_task.published_at = chrono::Utc::now();

        match serde_json::to_vec(&next_task) {
            Ok(payload) => {
                if let Err(e) = state.bus.publish_delayed("deliveries", payload, delay).await {
                    tracing::error!(error = %e, "failed to requeue delivery task");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize requeued task"),
        }
    }

    ProcessResult::Requeued
}
