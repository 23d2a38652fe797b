//! In-memory implementation of the EventBus trait for tests and local dev.

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// EventBus implementation using a Tokio broadcast channel.
///
/// Messages are broadcast to all subscribers. Each subscriber filters by its
/// own subject pattern. Suitable for unit and integration tests that need a
/// fast, isolated bus with no external dependencies.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory bus with a 1000-message broadcast buffer.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// NATS-style wildcard matching: `*` matches exactly one token, `>`
    /// matches one or more remaining tokens.
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" {
                s_idx += 1;
                p_idx += 1;
            } else if subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let msg = BusMessage::new(subject.to_string(), payload);
        // No receivers is not an error — fire and forget.
        let _ = self.sender.send(msg);
        Ok(())
    }

    async fn publish_delayed(
        &self,
        subject: &str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> BusResult<()> {
        let sender = self.sender.clone();
        let subject = subject.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let msg = BusMessage::new(subject, payload);
            let _ = sender.send(msg);
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn pattern_matching() {
        assert!(InMemoryBus::matches_pattern(
            "deliveries.t1.ep1",
            "deliveries.t1.ep1"
        ));
        assert!(InMemoryBus::matches_pattern(
            "deliveries.t1.ep1",
            "deliveries.*.ep1"
        ));
        assert!(InMemoryBus::matches_pattern("deliveries.t1.ep1", "deliveries.>"));
        assert!(!InMemoryBus::matches_pattern("deliveries.t1.ep1", "billing.>"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("deliveries.>").await.unwrap();

        bus.publish("deliveries.task", b"hello".to_vec())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "deliveries.task");
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn publish_delayed_is_not_immediately_visible() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("deliveries.>").await.unwrap();

        bus.publish_delayed("deliveries.retry", b"later".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        assert!(early.is_err(), "message should not be visible yet");

        let msg = tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg.subject, "deliveries.retry");
    }
}
