//! Durable store abstraction. Postgres is the production backend; the
//! in-memory backend lets the ingest/fanout and worker logic be tested
//! without a live database, mirroring the dual-backend shape of the event
//! bus.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::model::{DeadLetter, Delivery, DeliveryStatus, Endpoint, Event, Subscription};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub headers: Option<serde_json::Value>,
    pub rate_per_sec: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: String,
    pub event_type: String,
    pub endpoint_id: String,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tenant_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Outcome of inserting an event: whether a fresh row was created, and
/// whether that event already has delivery rows (used to detect a
/// duplicate idempotent publish that should return zero fanout).
#[derive(Debug, Clone)]
pub struct EventInsertResult {
    pub event: Event,
    pub inserted: bool,
    pub has_deliveries: bool,
}

#[derive(Debug, Clone)]
pub struct DeliveryStatusFilter {
    pub endpoint_id: Option<String>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub dead_letter: DeadLetter,
    pub delivery: Delivery,
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn create_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, sqlx::Error>;
    async fn get_endpoint(&self, tenant_id: &str, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error>;
    /// Looks up an endpoint by id alone, without a tenant filter. Used by the
    /// worker and by replay, where the caller has a delivery row but not yet
    /// the owning tenant.
    async fn get_endpoint_by_id(&self, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error>;
    async fn get_endpoint_secret(&self, endpoint_id: &str) -> Result<Option<String>, sqlx::Error>;

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, sqlx::Error>;
    async fn subscriptions_for(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<Subscription>, sqlx::Error>;

    /// Insert-if-absent on `(tenant_id, idempotency_key)` followed by a
    /// lookup, per the idempotent-publish pattern. Callers without an
    /// idempotency key always get `inserted = true`.
    async fn insert_event(&self, new: NewEvent) -> Result<EventInsertResult, sqlx::Error>;

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, sqlx::Error>;

    /// Create one `queued` delivery row per endpoint in a single batched
    /// write. Returns the created rows in the same order as `endpoint_ids`.
    async fn create_deliveries(
        &self,
        event_id: &str,
        endpoint_ids: &[String],
    ) -> Result<Vec<Delivery>, sqlx::Error>;

    async fn create_replay(
        &self,
        source_delivery_id: &str,
        reason: Option<String>,
    ) -> Result<Option<Delivery>, sqlx::Error>;

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, sqlx::Error>;

    async fn deliveries_for_event(
        &self,
        event_id: &str,
        filter: DeliveryStatusFilter,
    ) -> Result<Vec<Delivery>, sqlx::Error>;

    async fn apply_transition(
        &self,
        delivery_id: &str,
        transition: crate::state_machine::Transition,
    ) -> Result<(), sqlx::Error>;

    async fn insert_dead_letter(&self, delivery_id: &str, reason: &str) -> Result<(), sqlx::Error>;

    async fn list_dead_letters(
        &self,
        endpoint_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, sqlx::Error>;

    async fn ping(&self) -> Result<(), sqlx::Error>;
}

pub fn is_terminal(status: DeliveryStatus) -> bool {
    matches!(status, DeliveryStatus::Delivered | DeliveryStatus::Dead)
}
