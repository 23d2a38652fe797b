use super::{
    DeadLetterEntry, DeliveryStatusFilter, DeliveryStore, EventInsertResult, NewEndpoint, NewEvent,
    NewSubscription,
};
use crate::model::{DeadLetter, Delivery, DeliveryStatus, Endpoint, Event, Subscription};
use crate::state_machine::Transition;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DeliveryStore for PostgresStore {
    async fn create_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query_as::<_, Endpoint>(
            r#"
            INSERT INTO endpoints (id, tenant_id, url, secret, headers, rate_per_sec)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, tenant_id, url, secret, headers, rate_per_sec, created_at
            "#,
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.url)
        .bind(&new.secret)
        .bind(&new.headers)
        .bind(new.rate_per_sec)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_endpoint(&self, tenant_id: &str, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(
            "SELECT id, tenant_id, url, secret, headers, rate_per_sec, created_at
             FROM endpoints WHERE id = $1 AND tenant_id = $2",
        )
        .bind(endpoint_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_endpoint_by_id(&self, endpoint_id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(
            "SELECT id, tenant_id, url, secret, headers, rate_per_sec, created_at
             FROM endpoints WHERE id = $1",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_endpoint_secret(&self, endpoint_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT secret FROM endpoints WHERE id = $1")
            .bind(endpoint_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (id, tenant_id, event_type, endpoint_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, tenant_id, event_type, endpoint_id, created_at
            "#,
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.event_type)
        .bind(&new.endpoint_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn subscriptions_for(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT id, tenant_id, event_type, endpoint_id, created_at
             FROM subscriptions WHERE tenant_id = $1 AND event_type = $2",
        )
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_event(&self, new: NewEvent) -> Result<EventInsertResult, sqlx::Error> {
        let id = Uuid::new_v4().to_string();

        if let Some(key) = &new.idempotency_key {
            // Insert-if-absent then re-read by the unique key — never
            // SELECT-then-INSERT, it races.
            sqlx::query(
                r#"
                INSERT INTO events (id, tenant_id, event_type, payload, idempotency_key, occurred_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
                "#,
            )
            .bind(&id)
            .bind(&new.tenant_id)
            .bind(&new.event_type)
            .bind(&new.payload)
            .bind(key)
            .bind(new.occurred_at)
            .execute(&self.pool)
            .await?;

            let event = sqlx::query_as::<_, Event>(
                "SELECT id, tenant_id, event_type, payload, idempotency_key, occurred_at, created_at
                 FROM events WHERE tenant_id = $1 AND idempotency_key = $2",
            )
            .bind(&new.tenant_id)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

            let inserted = event.id == id;

            let has_deliveries = if inserted {
                false
            } else {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM deliveries WHERE event_id = $1")
                    .bind(&event.id)
                    .fetch_one(&self.pool)
                    .await?
                    > 0
            };

            Ok(EventInsertResult {
                event,
                inserted,
                has_deliveries,
            })
        } else {
            let event = sqlx::query_as::<_, Event>(
                r#"
                INSERT INTO events (id, tenant_id, event_type, payload, idempotency_key, occurred_at)
                VALUES ($1, $2, $3, $4, NULL, $5)
                RETURNING id, tenant_id, event_type, payload, idempotency_key, occurred_at, created_at
                "#,
            )
            .bind(&id)
            .bind(&new.tenant_id)
            .bind(&new.event_type)
            .bind(&new.payload)
            .bind(new.occurred_at)
            .fetch_one(&self.pool)
            .await?;

            Ok(EventInsertResult {
                event,
                inserted: true,
                has_deliveries: false,
            })
        }
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            "SELECT id, tenant_id, event_type, payload, idempotency_key, occurred_at, created_at
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_deliveries(
        &self,
        event_id: &str,
        endpoint_ids: &[String],
    ) -> Result<Vec<Delivery>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Vec::with_capacity(endpoint_ids.len());

        for endpoint_id in endpoint_ids {
            let id = Uuid::new_v4().to_string();
            let row = sqlx::query_as::<_, Delivery>(
                r#"
                INSERT INTO deliveries (id, event_id, endpoint_id, status, attempt)
                VALUES ($1, $2, $3, 'queued', 0)
                RETURNING id, event_id, endpoint_id, status, attempt, replay_of, replay_reason,
                          http_status, latency_ms, last_error, error_reason,
                          enqueued_at, dequeued_at, sent_at, delivered_at, failed_at, dlq_at, updated_at
                "#,
            )
            .bind(&id)
            .bind(event_id)
            .bind(endpoint_id)
            .fetch_one(&mut *tx)
            .await?;
            rows.push(row);
        }

        tx.commit().await?;
        Ok(rows)
    }

    async fn create_replay(
        &self,
        source_delivery_id: &str,
        reason: Option<String>,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        let source = sqlx::query_as::<_, Delivery>(
            "SELECT id, event_id, endpoint_id, status, attempt, replay_of, replay_reason,
                    http_status, latency_ms, last_error, error_reason,
                    enqueued_at, dequeued_at, sent_at, delivered_at, failed_at, dlq_at, updated_at
             FROM deliveries WHERE id = $1",
        )
        .bind(source_delivery_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(source) = source else {
            return Ok(None);
        };

        let id = Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, Delivery>(
            r#"
            INSERT INTO deliveries (id, event_id, endpoint_id, status, attempt, replay_of, replay_reason)
            VALUES ($1, $2, $3, 'queued', 0, $4, $5)
            RETURNING id, event_id, endpoint_id, status, attempt, replay_of, replay_reason,
                      http_status, latency_ms, last_error, error_reason,
                      enqueued_at, dequeued_at, sent_at, delivered_at, failed_at, dlq_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(&source.event_id)
        .bind(&source.endpoint_id)
        .bind(source_delivery_id)
        .bind(&reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(row))
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(
            "SELECT id, event_id, endpoint_id, status, attempt, replay_of, replay_reason,
                    http_status, latency_ms, last_error, error_reason,
                    enqueued_at, dequeued_at, sent_at, delivered_at, failed_at, dlq_at, updated_at
             FROM deliveries WHERE id = $1",
        )
        .bind(delivery_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn deliveries_for_event(
        &self,
        event_id: &str,
        filter: DeliveryStatusFilter,
    ) -> Result<Vec<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, event_id, endpoint_id, status, attempt, replay_of, replay_reason,
                   http_status, latency_ms, last_error, error_reason,
                   enqueued_at, dequeued_at, sent_at, delivered_at, failed_at, dlq_at, updated_at
            FROM deliveries
            WHERE event_id = $1
              AND ($2::text IS NULL OR endpoint_id = $2)
              AND ($3::timestamptz IS NULL OR enqueued_at >= $3)
              AND ($4::timestamptz IS NULL OR enqueued_at <= $4)
            ORDER BY enqueued_at ASC
            LIMIT $5
            "#,
        )
        .bind(event_id)
        .bind(&filter.endpoint_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn apply_transition(
        &self,
        delivery_id: &str,
        transition: Transition,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = $2,
                attempt = $3,
                http_status = $4,
                latency_ms = $5,
                last_error = $6,
                delivered_at = COALESCE($7, delivered_at),
                failed_at = COALESCE($8, failed_at),
                dlq_at = COALESCE($9, dlq_at),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(transition.new_status)
        .bind(transition.attempt)
        .bind(transition.http_status)
        .bind(transition.latency_ms)
        .bind(&transition.last_error)
        .bind(transition.delivered_at)
        .bind(transition.failed_at)
        .bind(transition.dlq_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_dead_letter(&self, delivery_id: &str, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO dead_letters (delivery_id, reason) VALUES ($1, $2)
             ON CONFLICT (delivery_id) DO NOTHING",
        )
        .bind(delivery_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_dead_letters(
        &self,
        endpoint_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct Row {
            delivery_id: String,
            reason: String,
            dlq_created_at: chrono::DateTime<chrono::Utc>,
            d_id: String,
            event_id: String,
            endpoint_id: String,
            status: DeliveryStatus,
            attempt: i32,
            replay_of: Option<String>,
            replay_reason: Option<String>,
            http_status: Option<i32>,
            latency_ms: Option<i32>,
            last_error: Option<String>,
            error_reason: Option<String>,
            enqueued_at: chrono::DateTime<chrono::Utc>,
            dequeued_at: Option<chrono::DateTime<chrono::Utc>>,
            sent_at: Option<chrono::DateTime<chrono::Utc>>,
            delivered_at: Option<chrono::DateTime<chrono::Utc>>,
            failed_at: Option<chrono::DateTime<chrono::Utc>>,
            dlq_at: Option<chrono::DateTime<chrono::Utc>>,
            updated_at: chrono::DateTime<chrono::Utc>,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT dl.delivery_id, dl.reason, dl.created_at AS dlq_created_at,
                   d.id AS d_id, d.event_id, d.endpoint_id, d.status, d.attempt,
                   d.replay_of, d.replay_reason, d.http_status, d.latency_ms,
                   d.last_error, d.error_reason, d.enqueued_at, d.dequeued_at,
                   d.sent_at, d.delivered_at, d.failed_at, d.dlq_at, d.updated_at
            FROM dead_letters dl
            JOIN deliveries d ON d.id = dl.delivery_id
            WHERE $1::text IS NULL OR d.endpoint_id = $1
            ORDER BY dl.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(endpoint_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DeadLetterEntry {
                dead_letter: DeadLetter {
                    delivery_id: r.delivery_id,
                    reason: r.reason,
                    created_at: r.dlq_created_at,
                },
                delivery: Delivery {
                    id: r.d_id,
                    event_id: r.event_id,
                    endpoint_id: r.endpoint_id,
                    status: r.status,
                    attempt: r.attempt,
                    replay_of: r.replay_of,
                    replay_reason: r.replay_reason,
                    http_status: r.http_status,
                    latency_ms: r.latency_ms,
                    last_error: r.last_error,
                    error_reason: r.error_reason,
                    enqueued_at: r.enqueued_at,
                    dequeued_at: r.dequeued_at,
                    sent_at: r.sent_at,
                    delivered_at: r.delivered_at,
                    failed_at: r.failed_at,
                    dlq_at: r.dlq_at,
                    updated_at: r.updated_at,
                },
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
