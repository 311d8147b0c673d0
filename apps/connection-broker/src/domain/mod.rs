//! Domain Layer - Connection lifecycle and adapter contract.
//!
//! This layer contains the connection state machine, the registry of live
//! connections and the capability contract adapters implement. It knows
//! nothing about transports, message buses or configuration sources.

/// Adapter capability contract and catalog.
pub mod adapter;

/// Connections, their state machine and the registry.
pub mod connection;

/// Market data and account values returned by adapters.
pub mod market;
