//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the system adapters.

/// System adapters (simulated exchange, scriptable mock).
pub mod adapters;

/// Broadcast channel publisher for connection changes.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Credential refresh scheduler.
pub mod refresh;

/// OpenTelemetry tracing integration.
pub mod telemetry;
