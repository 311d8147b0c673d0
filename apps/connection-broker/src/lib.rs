#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Connection Broker - Multi-tenant Broker Connection Registry
//!
//! Owns the connections users open to external trading and market-data
//! systems. Each connection is one adapter session, addressed by
//! `(username, connection_code)`; the broker admits connects, tracks the
//! lifecycle, routes queries to the right session and announces every
//! status transition.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Connection state machine and adapter contract
//!   - `connection`: Contexts, registry, request/result value types
//!   - `adapter`: `SystemAdapter` capability trait and the catalog
//!   - `market`: Root symbols, instruments, price bars, accounts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Change notification publisher
//!   - `services`: Connect, disconnect, listings and query dispatch
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `adapters`: Simulated exchange and scriptable mock
//!   - `broadcast`: Channel-based change distribution
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `refresh`: Credential refresh scheduler
//!
//! # Data Flow
//!
//! ```text
//!  Connect ───┐                                 ┌──► Adapter session
//!             ├──► ConnectionService ──► Registry
//!  Query ─────┘            │                    └──► Adapter session
//!                          ▼
//!                 ChangeBroadcaster ──► subscribers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection lifecycle with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Service error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::adapter::{
    AdapterCatalog, AdapterError, AdapterFactory, AdapterInfo, ConnectOutcome, ProxyLoginTemplate,
    SystemAdapter,
};
pub use domain::connection::{
    ConnectionAction, ConnectionChange, ConnectionContext, ConnectionFilter, ConnectionInfo,
    ConnectionRegistry, ConnectionResult, ConnectionSpec, ConnectionStatus, RegistryStats,
    SessionIdentity,
};

// Application
pub use application::ports::{ConnectionChangePublisher, PublishError};
pub use application::services::ConnectionService;
pub use error::{ErrorCode, ServiceError};

// Infrastructure config
pub use infrastructure::config::{BrokerConfig, ConfigError, RefreshSettings, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Change broadcaster
pub use infrastructure::broadcast::ChangeBroadcaster;

// Refresh scheduler
pub use infrastructure::refresh::{RefreshReport, RefreshScheduler};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
