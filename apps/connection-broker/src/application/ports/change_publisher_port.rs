//! Change Publisher Port (Driven Port)
//!
//! Interface for announcing connection status transitions to external
//! observers.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::connection::ConnectionChange;

/// Change publishing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The channel no longer accepts messages.
    #[error("Change channel is closed")]
    ChannelClosed,

    /// Serialization error.
    #[error("Change serialization error: {message}")]
    SerializationError {
        /// Error details.
        message: String,
    },

    /// Publishing failed.
    #[error("Change publish failed: {message}")]
    PublishFailed {
        /// Error details.
        message: String,
    },
}

/// Port for publishing connection change messages.
///
/// Delivery is best effort; an `Err` means the message was certainly not
/// handed to the bus.
#[async_trait]
pub trait ConnectionChangePublisher: Send + Sync {
    /// Publish one change message on its topic.
    async fn publish(&self, change: ConnectionChange) -> Result<(), PublishError>;
}

/// No-op publisher for wiring without a bus.
#[derive(Debug, Clone, Default)]
pub struct NoOpChangePublisher;

#[async_trait]
impl ConnectionChangePublisher for NoOpChangePublisher {
    async fn publish(&self, _change: ConnectionChange) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-memory publisher that records messages.
///
/// Suitable for testing. Can be switched to fail every publish.
#[derive(Debug, Default)]
pub struct InMemoryChangePublisher {
    published: RwLock<Vec<ConnectionChange>>,
    failing: AtomicBool,
}

impl InMemoryChangePublisher {
    /// Create a new empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages published so far.
    #[must_use]
    pub fn published(&self) -> Vec<ConnectionChange> {
        self.published.read().clone()
    }

    /// Number of messages published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    /// Check if nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }
}

#[async_trait]
impl ConnectionChangePublisher for InMemoryChangePublisher {
    async fn publish(&self, change: ConnectionChange) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::PublishFailed {
                message: "message bus unavailable".to_string(),
            });
        }
        self.published.write().push(change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::ConnectionStatus;
    use chrono::Utc;

    fn change(status: ConnectionStatus) -> ConnectionChange {
        ConnectionChange {
            username: "alice".to_string(),
            connection_code: "main".to_string(),
            system_code: "broker-x".to_string(),
            status,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_op_publisher_succeeds() {
        let publisher = NoOpChangePublisher;
        let result = publisher.publish(change(ConnectionStatus::Connected)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn in_memory_publisher_records() {
        let publisher = InMemoryChangePublisher::new();
        assert!(publisher.is_empty());

        publisher
            .publish(change(ConnectionStatus::Connected))
            .await
            .unwrap();
        publisher
            .publish(change(ConnectionStatus::Disconnected))
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(publisher.len(), 2);
        assert_eq!(published[0].status, ConnectionStatus::Connected);
        assert_eq!(published[1].status, ConnectionStatus::Disconnected);
        assert_eq!(published[0].topic(), "connection-change");
    }

    #[tokio::test]
    async fn in_memory_publisher_failure_toggle() {
        let publisher = InMemoryChangePublisher::new();
        publisher.set_failing(true);

        let result = publisher.publish(change(ConnectionStatus::Connected)).await;
        assert!(matches!(result, Err(PublishError::PublishFailed { .. })));
        assert!(publisher.is_empty());

        publisher.set_failing(false);
        assert!(
            publisher
                .publish(change(ConnectionStatus::Connected))
                .await
                .is_ok()
        );
    }
}
