//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the connection service and the port interfaces
//! that define how it reaches external collaborators.

/// Port interfaces for external systems (change notifications).
pub mod ports;

/// Application services orchestrating the connection lifecycle.
pub mod services;
