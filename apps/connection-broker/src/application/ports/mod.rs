//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ConnectionChangePublisher`: announces connection status transitions
//!   on the message bus
//!
//! The adapter capability contract lives in `domain::adapter`: adapters are
//! the plug-in point of the domain itself, not an outbound collaborator.

mod change_publisher_port;

pub use change_publisher_port::{
    ConnectionChangePublisher, InMemoryChangePublisher, NoOpChangePublisher, PublishError,
};
