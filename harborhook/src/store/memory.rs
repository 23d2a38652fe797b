use super::{
    DeadLetterEntry, DeliveryStatusFilter, DeliveryStore, EventInsertResult, NewEndpoint, NewEvent,
    NewSubscription,
};
use crate::model::{DeadLetter, Delivery, DeliveryStatus, Endpoint, Event, Subscription};
use crate::state_machine::Transition;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory `DeliveryStore` for tests and local development without
/// Postgres. Mirrors the Postgres backend's semantics, including the
/// insert-if-absent idempotency behavior.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<String, Endpoint>,
    subscriptions: Vec<Subscription>,
    events_by_id: HashMap<String, Event>,
    events_by_idem_key: HashMap<(String, String), String>,
    deliveries: HashMap<String, Delivery>,
    dead_letters: HashMap<String, DeadLetter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn create_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let endpoint = Endpoint {
            id: Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id,
            url: new.url,
            secret: new.secret,
            headers: new.headers,
            rate_per_sec: new.rate_per_sec,
            created_at: Utc::now(),
        };
        inner.endpoints.insert(endpoint.id.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn get_endpoint(&self, tenant_id: &str, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .endpoints
            .get(endpoint_id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_endpoint_by_id(&self, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.endpoints.get(endpoint_id).cloned())
    }

    async fn get_endpoint_secret(&self, endpoint_id: &str) -> Result<Option<String>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.endpoints.get(endpoint_id).map(|e| e.secret.clone()))
    }

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let sub = Subscription {
            id: Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id,
            event_type: new.event_type,
            endpoint_id: new.endpoint_id,
            created_at: Utc::now(),
        };
        inner.subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn subscriptions_for(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, new: NewEvent) -> Result<EventInsertResult, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(key) = &new.idempotency_key {
            let dedup_key = (new.tenant_id.clone(), key.clone());
            if let Some(existing_id) = inner.events_by_idem_key.get(&dedup_key).cloned() {
                let event = inner.events_by_id.get(&existing_id).unwrap().clone();
                let has_deliveries = inner
                    .deliveries
                    .values()
                    .any(|d| d.event_id == existing_id);
                return Ok(EventInsertResult {
                    event,
                    inserted: false,
                    has_deliveries,
                });
            }

            let event = Event {
                id: Uuid::new_v4().to_string(),
                tenant_id: new.tenant_id.clone(),
                event_type: new.event_type,
                payload: new.payload,
                idempotency_key: new.idempotency_key,
                occurred_at: new.occurred_at,
                created_at: Utc::now(),
            };
            inner.events_by_idem_key.insert(dedup_key, event.id.clone());
            inner.events_by_id.insert(event.id.clone(), event.clone());

            Ok(EventInsertResult {
                event,
                inserted: true,
                has_deliveries: false,
            })
        } else {
            let event = Event {
                id: Uuid::new_v4().to_string(),
                tenant_id: new.tenant_id,
                event_type: new.event_type,
                payload: new.payload,
                idempotency_key: None,
                occurred_at: new.occurred_at,
                created_at: Utc::now(),
            };
            inner.events_by_id.insert(event.id.clone(), event.clone());

            Ok(EventInsertResult {
                event,
                inserted: true,
                has_deliveries: false,
            })
        }
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.events_by_id.get(event_id).cloned())
    }

    async fn create_deliveries(
        &self,
        event_id: &str,
        endpoint_ids: &[String],
    ) -> Result<Vec<Delivery>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let mut rows = Vec::with_capacity(endpoint_ids.len());

        for endpoint_id in endpoint_ids {
            let now = Utc::now();
            let delivery = Delivery {
                id: Uuid::new_v4().to_string(),
                event_id: event_id.to_string(),
                endpoint_id: endpoint_id.clone(),
                status: DeliveryStatus::Queued,
                attempt: 0,
                replay_of: None,
                replay_reason: None,
                http_status: None,
                latency_ms: None,
                last_error: None,
                error_reason: None,
                enqueued_at: now,
                dequeued_at: None,
                sent_at: None,
                delivered_at: None,
                failed_at: None,
                dlq_at: None,
                updated_at: now,
            };
            inner.deliveries.insert(delivery.id.clone(), delivery.clone());
            rows.push(delivery);
        }

        Ok(rows)
    }

    async fn create_replay(
        &self,
        source_delivery_id: &str,
        reason: Option<String>,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let Some(source) = inner.deliveries.get(source_delivery_id).cloned() else {
            return Ok(None);
        };

        let now = Utc::now();
        let replay = Delivery {
            id: Uuid::new_v4().to_string(),
            event_id: source.event_id.clone(),
            endpoint_id: source.endpoint_id.clone(),
            status: DeliveryStatus::Queued,
            attempt: 0,
            replay_of: Some(source_delivery_id.to_string()),
            replay_reason: reason,
            http_status: None,
            latency_ms: None,
            last_error: None,
            error_reason: None,
            enqueued_at: now,
            dequeued_at: None,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            dlq_at: None,
            updated_at: now,
        };
        inner.deliveries.insert(replay.id.clone(), replay.clone());
        Ok(Some(replay))
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.deliveries.get(delivery_id).cloned())
    }

    async fn deliveries_for_event(
        &self,
        event_id: &str,
        filter: DeliveryStatusFilter,
    ) -> Result<Vec<Delivery>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| d.event_id == event_id)
            .filter(|d| {
                filter
                    .endpoint_id
                    .as_ref()
                    .map_or(true, |eid| &d.endpoint_id == eid)
            })
            .filter(|d| filter.from.map_or(true, |from| d.enqueued_at >= from))
            .filter(|d| filter.to.map_or(true, |to| d.enqueued_at <= to))
            .cloned()
            .collect();

        rows.sort_by_key(|d| d.enqueued_at);
        rows.truncate(filter.limit.max(0) as usize);
        Ok(rows)
    }

    async fn apply_transition(
        &self,
        delivery_id: &str,
        transition: Transition,
    ) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(d) = inner.deliveries.get_mut(delivery_id) {
            d.status = transition.new_status;
            d.attempt = transition.attempt;
            d.http_status = transition.http_status;
            d.latency_ms = transition.latency_ms;
            d.last_error = transition.last_error;
            if transition.delivered_at.is_some() {
                d.delivered_at = transition.delivered_at;
            }
            if transition.failed_at.is_some() {
                d.failed_at = transition.failed_at;
            }
            if transition.dlq_at.is_some() {
                d.dlq_at = transition.dlq_at;
            }
            d.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_dead_letter(&self, delivery_id: &str, reason: &str) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .dead_letters
            .entry(delivery_id.to_string())
            .or_insert(DeadLetter {
                delivery_id: delivery_id.to_string(),
                reason: reason.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        endpoint_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<DeadLetterEntry> = inner
            .dead_letters
            .values()
            .filter_map(|dl| {
                let delivery = inner.deliveries.get(&dl.delivery_id)?;
                if let Some(eid) = endpoint_id {
                    if delivery.endpoint_id != eid {
                        return None;
                    }
                }
                Some(DeadLetterEntry {
                    dead_letter: dl.clone(),
                    delivery: delivery.clone(),
                })
            })
            .collect();

        entries.sort_by_key(|e| std::cmp::Reverse(e.dead_letter.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}
