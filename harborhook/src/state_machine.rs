//! Centralizes every permitted delivery status transition. No other module
//! writes `deliveries.status` directly.

use crate::model::{DeliveryStatus, Outcome};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal transition from {from} on outcome")]
    IllegalTransition { from: DeliveryStatus },
}

/// The fields a transition wants written back to the delivery row. `None`
/// means "leave unchanged".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub new_status: DeliveryStatus,
    pub attempt: i32,
    pub http_status: Option<i32>,
    pub latency_ms: Option<i32>,
    pub last_error: Option<String>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub dlq_at: Option<DateTime<Utc>>,
    pub should_requeue: bool,
}

/// `queued -> inflight` on dequeue. The only transition that doesn't
/// originate from an HTTP attempt outcome.
pub fn mark_inflight(current_attempt: i32) -> Transition {
    Transition {
        new_status: DeliveryStatus::Inflight,
        attempt: current_attempt,
        http_status: None,
        latency_ms: None,
        last_error: None,
        dequeued_at: Some(Utc::now()),
        delivered_at: None,
        failed_at: None,
        dlq_at: None,
        should_requeue: false,
    }
}

/// Apply the result of one HTTP attempt. `current_status` must be
/// `Inflight`; any other starting state is a programming error upstream
/// (the worker always marks inflight before attempting delivery).
pub fn apply(
    current_status: DeliveryStatus,
    current_attempt: i32,
    outcome: Outcome,
    http_status: Option<i32>,
    latency_ms: i32,
    error_detail: Option<String>,
    max_attempts: u32,
) -> Result<Transition, StateError> {
    if current_status != DeliveryStatus::Inflight {
        return Err(StateError::IllegalTransition {
            from: current_status,
        });
    }

    let next_attempt = current_attempt + 1;

    if outcome.is_success() {
        return Ok(Transition {
            new_status: DeliveryStatus::Delivered,
            attempt: next_attempt,
            http_status,
            latency_ms: Some(latency_ms),
            last_error: None,
            dequeued_at: None,
            delivered_at: Some(Utc::now()),
            failed_at: None,
            dlq_at: None,
            should_requeue: false,
        });
    }

    let last_error = Some(match &error_detail {
        Some(detail) => format!("{}: {}", outcome.as_str(), detail),
        None => outcome.as_str().to_string(),
    });

    if next_attempt as u32 >= max_attempts {
        return Ok(Transition {
            new_status: DeliveryStatus::Dead,
            attempt: next_attempt,
            http_status,
            latency_ms: Some(latency_ms),
            last_error,
            dequeued_at: None,
            delivered_at: None,
            failed_at: Some(Utc::now()),
            dlq_at: Some(Utc::now()),
            should_requeue: false,
        });
    }

    Ok(Transition {
        new_status: DeliveryStatus::Failed,
        attempt: next_attempt,
        http_status,
        latency_ms: Some(latency_ms),
        last_error,
        dequeued_at: None,
        delivered_at: None,
        failed_at: Some(Utc::now()),
        dlq_at: None,
        should_requeue: true,
    })
}

/// The reason string recorded on the dead-letter row.
pub fn dead_letter_reason(attempt: i32, http_status: Option<i32>, last_error: &str) -> String {
    match http_status {
        Some(status) => format!(
            "max attempts reached ({attempt}): last http_status={status}, error={last_error}"
        ),
        None => format!("max attempts reached ({attempt}): error={last_error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_marks_inflight() {
        let t = mark_inflight(0);
        assert_eq!(t.new_status, DeliveryStatus::Inflight);
        assert!(t.dequeued_at.is_some());
    }

    #[test]
    fn success_marks_delivered_and_bumps_attempt() {
        let t = apply(DeliveryStatus::Inflight, 0, Outcome::Success, Some(200), 42, None, 5).unwrap();
        assert_eq!(t.new_status, DeliveryStatus::Delivered);
        assert_eq!(t.attempt, 1);
        assert_eq!(t.http_status, Some(200));
        assert!(t.last_error.is_none());
        assert!(!t.should_requeue);
    }

    #[test]
    fn failure_below_max_attempts_is_failed_and_requeues() {
        let t = apply(
            DeliveryStatus::Inflight,
            1,
            Outcome::Http5xx,
            Some(500),
            10,
            Some("server error".into()),
            5,
        )
        .unwrap();
        assert_eq!(t.new_status, DeliveryStatus::Failed);
        assert_eq!(t.attempt, 2);
        assert!(t.should_requeue);
        assert!(t.last_error.unwrap().contains("http_5xx"));
    }

    #[test]
    fn failure_at_max_attempts_goes_dead() {
        let t = apply(
            DeliveryStatus::Inflight,
            4,
            Outcome::Http5xx,
            Some(500),
            10,
            Some("server error".into()),
            5,
        )
        .unwrap();
        assert_eq!(t.new_status, DeliveryStatus::Dead);
        assert_eq!(t.attempt, 5);
        assert!(!t.should_requeue);
        assert!(t.dlq_at.is_some());
    }

    #[test]
    fn transition_from_non_inflight_is_rejected() {
        let err = apply(DeliveryStatus::Queued, 0, Outcome::Success, Some(200), 1, None, 5)
            .unwrap_err();
        assert_eq!(err, StateError::IllegalTransition { from: DeliveryStatus::Queued });
    }

    #[test]
    fn dead_letter_reason_mentions_attempt_count() {
        let reason = dead_letter_reason(3, Some(500), "server error");
        assert!(reason.contains("max attempts reached (3)"));
    }
}
