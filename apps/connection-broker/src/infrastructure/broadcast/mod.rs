//! Broadcast Change Publisher
//!
//! Implements the change publisher port on top of a tokio broadcast
//! channel for fan-out to in-process subscribers (the change log, a bus
//! bridge, tests).
//!
//! Publishing while nobody listens is a best-effort success: the message
//! is dropped. Once [`ChangeBroadcaster::close`] has been called every
//! publish fails with `ChannelClosed`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{ConnectionChangePublisher, PublishError};
use crate::domain::connection::ConnectionChange;

/// Default capacity of the change channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// Largest accepted capacity of the change channel.
pub const MAX_CHANGE_CAPACITY: usize = 1 << 20;

/// Fan-out publisher of connection change messages.
///
/// # Example
///
/// ```rust
/// use connection_broker::infrastructure::broadcast::ChangeBroadcaster;
///
/// let broadcaster = ChangeBroadcaster::new(16);
/// let mut rx = broadcaster.subscribe();
/// assert_eq!(broadcaster.receiver_count(), 1);
/// # drop(rx.try_recv());
/// ```
#[derive(Debug)]
pub struct ChangeBroadcaster {
    tx: broadcast::Sender<ConnectionChange>,
    closed: AtomicBool,
}

impl ChangeBroadcaster {
    /// Create a broadcaster with the given channel capacity, clamped to
    /// `1..=MAX_CHANGE_CAPACITY`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.clamp(1, MAX_CHANGE_CAPACITY)).0,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a broadcaster with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CHANGE_CAPACITY)
    }

    /// Get a new receiver for change messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionChange> {
        self.tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Refuse further publishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Check if the broadcaster has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl ConnectionChangePublisher for ChangeBroadcaster {
    async fn publish(&self, change: ConnectionChange) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::ChannelClosed);
        }

        if self.tx.send(change).is_err() {
            tracing::trace!("No change subscribers, message dropped");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
