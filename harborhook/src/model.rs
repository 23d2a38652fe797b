use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Endpoint {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub headers: Option<serde_json::Value>,
    pub rate_per_sec: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// What `CreateEndpoint` returns to the caller — the secret is never echoed
/// back after creation.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointView {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl From<Endpoint> for EndpointView {
    fn from(e: Endpoint) -> Self {
        EndpointView {
            id: e.id,
            tenant_id: e.tenant_id,
            url: e.url,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub endpoint_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Inflight,
    Delivered,
    Failed,
    Dead,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Inflight => "inflight",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: String,
    pub event_id: String,
    pub endpoint_id: String,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub replay_of: Option<String>,
    pub replay_reason: Option<String>,
    pub http_status: Option<i32>,
    pub latency_ms: Option<i32>,
    pub last_error: Option<String>,
    pub error_reason: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub dlq_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub delivery_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The message placed on the broker's `deliveries` subject. Requeues update
/// `attempt` before re-serializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub delivery_id: String,
    pub event_id: String,
    pub tenant_id: String,
    pub endpoint_id: String,
    pub endpoint_url: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub published_at: DateTime<Utc>,
    pub trace_headers: std::collections::HashMap<String, String>,
}

/// Classification of a delivery attempt's outcome, per the transport/status
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
    ConnectionRefused,
    DnsError,
    Network,
    Http5xx,
    Http429,
    Http4xx,
    Other,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Timeout => "timeout",
            Outcome::ConnectionRefused => "connection_refused",
            Outcome::DnsError => "dns_error",
            Outcome::Network => "network",
            Outcome::Http5xx => "http_5xx",
            Outcome::Http429 => "http_429",
            Outcome::Http4xx => "http_4xx",
            Outcome::Other => "other",
        }
    }
}
