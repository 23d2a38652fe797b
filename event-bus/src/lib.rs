//! # EventBus Abstraction
//!
//! A pluggable publish/subscribe abstraction shared by the ingest API and the
//! delivery worker. Two implementations are provided:
//!
//! - **NatsBus**: production implementation backed by NATS JetStream.
//! - **InMemoryBus**: in-process implementation for development and tests.
//!
//! ## Delayed requeue
//!
//! Delivery retries are rescheduled by delay, not by sleeping inside the
//! worker. `publish_delayed` lets a caller hand the bus a message and a
//! duration; the bus is responsible for making the message visible to
//! subscribers only after that duration has elapsed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! bus.publish("deliveries", b"{}".to_vec()).await?;
//! bus.publish_delayed("deliveries", b"{}".to_vec(), Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

mod inmemory_bus;
mod nats_bus;

pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging with delayed
/// requeue support.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject immediately.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Publish a message that becomes visible to subscribers only after
    /// `delay` has elapsed. Used to schedule delivery retries without the
    /// caller blocking or sleeping.
    async fn publish_delayed(
        &self,
        subject: &str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern (supports NATS-style
    /// wildcards: `*` matches one token, `>` matches one or more).
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;

    /// Whether the bus currently considers itself connected. Used by the
    /// readiness endpoint; always `true` for the in-memory bus.
    fn is_connected(&self) -> bool {
        true
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
