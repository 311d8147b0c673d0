//! Connection Domain
//!
//! Types describing the connections users hold to external systems, the
//! per-connection state machine and the process-wide registry.
//!
//! # Design
//!
//! - `ConnectionContext`: one adapter session for a (user, connection code) pair
//! - `UserConnections`: a user's contexts keyed by connection code
//! - `ConnectionRegistry`: username → `UserConnections`, behind one lock
//!
//! The value types in this module (`ConnectionSpec`, `ConnectionResult`,
//! `ConnectionInfo`, ...) cross the service boundary and carry no identity
//! beyond the call that produced them.

mod context;
mod registry;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use context::{ConnectionContext, ContextOwner};
pub use registry::{ConnectionRegistry, RegistryMiss, RegistryStats, UserConnections};

/// Topic on which connection change messages are published.
pub const CONNECTION_CHANGE_TOPIC: &str = "connection-change";

/// Free-form parameter bag handed to adapters.
pub type Params = HashMap<String, serde_json::Value>;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session with the external system.
    #[default]
    Disconnected,
    /// A (possibly multi-step) handshake is in progress.
    Connecting,
    /// Usable for queries.
    Connected,
    /// The last connect attempt failed. A new Connect starts from scratch.
    Error,
}

impl ConnectionStatus {
    /// Get all statuses.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Disconnected,
            Self::Connecting,
            Self::Connected,
            Self::Error,
        ]
    }

    /// Whether a Connect on a context in this status must short-circuit.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }

    /// Get the status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Caller identity
// =============================================================================

/// Identity of the caller, as resolved by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    username: String,
    on_behalf_of: String,
    host: String,
}

impl SessionIdentity {
    /// Create an identity acting on its own behalf.
    #[must_use]
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            on_behalf_of: username.clone(),
            username,
            host: host.into(),
        }
    }

    /// Act on behalf of another user for delegated queries.
    #[must_use]
    pub fn on_behalf_of(mut self, username: impl Into<String>) -> Self {
        self.on_behalf_of = username.into();
        self
    }

    /// The acting username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The user whose connections delegated queries are routed to.
    #[must_use]
    pub fn on_behalf_of_user(&self) -> &str {
        &self.on_behalf_of
    }

    /// Originating host, used by adapters to build callback URLs.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

// =============================================================================
// Connect request / result
// =============================================================================

/// What to connect to and with which parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Code of the target system in the adapter catalog.
    pub system_code: String,
    /// Static adapter configuration (endpoint, credentials template, ...).
    #[serde(default)]
    pub config_params: Params,
    /// Per-attempt parameters (one-time codes, ...).
    #[serde(default)]
    pub connect_params: Params,
}

impl ConnectionSpec {
    /// Create a spec with empty parameter bags.
    #[must_use]
    pub fn new(system_code: impl Into<String>) -> Self {
        Self {
            system_code: system_code.into(),
            config_params: Params::new(),
            connect_params: Params::new(),
        }
    }

    /// Add a configuration parameter.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config_params.insert(key.into(), value.into());
        self
    }

    /// Add a connect-time parameter.
    #[must_use]
    pub fn with_connect(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.connect_params.insert(key.into(), value.into());
        self
    }
}

/// Follow-up the client must perform after a Connect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    /// Nothing to do.
    #[default]
    None,
    /// Open the URL carried in the result message.
    OpenUrl,
}

/// Outcome of a Connect call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResult {
    /// Status the connection is in after the call.
    pub status: ConnectionStatus,
    /// Follow-up action for the client.
    pub action: ConnectionAction,
    /// Authorization URL or human-readable description.
    pub message: String,
}

impl ConnectionResult {
    /// Connected immediately.
    #[must_use]
    pub const fn connected() -> Self {
        Self {
            status: ConnectionStatus::Connected,
            action: ConnectionAction::None,
            message: String::new(),
        }
    }

    /// Handshake started; the client must open `url`.
    #[must_use]
    pub fn open_url(url: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            action: ConnectionAction::OpenUrl,
            message: url.into(),
        }
    }

    /// Routine connect failure.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Error,
            action: ConnectionAction::None,
            message: message.into(),
        }
    }

    /// Short-circuit: the connection already exists and is usable.
    #[must_use]
    pub fn already_connected() -> Self {
        Self {
            status: ConnectionStatus::Connected,
            action: ConnectionAction::None,
            message: "Already connected".to_string(),
        }
    }

    /// Short-circuit: a handshake for this connection is in flight.
    #[must_use]
    pub fn still_connecting() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            action: ConnectionAction::None,
            message: "Still connecting".to_string(),
        }
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Detached description of one of a user's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Owning user.
    pub username: String,
    /// User-chosen connection code.
    pub connection_code: String,
    /// Code of the bound system.
    pub system_code: String,
    /// Display name of the bound system.
    pub system_name: String,
    /// Status at snapshot time.
    pub status: ConnectionStatus,
}

/// Optional restrictions applied when listing connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFilter {
    /// Only connections bound to this system.
    pub system_code: Option<String>,
    /// Only connections in this status.
    pub status: Option<ConnectionStatus>,
}

impl ConnectionFilter {
    /// Check whether a connection passes the filter.
    #[must_use]
    pub fn matches(&self, info: &ConnectionInfo) -> bool {
        self.system_code
            .as_deref()
            .is_none_or(|code| code == info.system_code)
            && self.status.is_none_or(|status| status == info.status)
    }
}

// =============================================================================
// Change notification
// =============================================================================

/// Message announcing a connection status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionChange {
    /// Owning user.
    pub username: String,
    /// User-chosen connection code.
    pub connection_code: String,
    /// Code of the bound system.
    pub system_code: String,
    /// New status.
    pub status: ConnectionStatus,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
}

impl ConnectionChange {
    /// Describe `context` transitioning to `status`.
    #[must_use]
    pub fn of(context: &ConnectionContext, status: ConnectionStatus) -> Self {
        Self {
            username: context.username().to_string(),
            connection_code: context.connection_code().to_string(),
            system_code: context.adapter_info().code,
            status,
            occurred_at: Utc::now(),
        }
    }

    /// Topic this message is published on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        CONNECTION_CHANGE_TOPIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_statuses() {
        assert!(ConnectionStatus::Connected.is_live());
        assert!(ConnectionStatus::Connecting.is_live());
        assert!(!ConnectionStatus::Error.is_live());
        assert!(!ConnectionStatus::Disconnected.is_live());
    }

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }

    #[test]
    fn identity_defaults_to_self() {
        let identity = SessionIdentity::new("alice", "broker.local");
        assert_eq!(identity.on_behalf_of_user(), "alice");

        let delegated = identity.on_behalf_of("bob");
        assert_eq!(delegated.username(), "alice");
        assert_eq!(delegated.on_behalf_of_user(), "bob");
        assert_eq!(delegated.host(), "broker.local");
    }

    #[test]
    fn short_circuit_results() {
        let connected = ConnectionResult::already_connected();
        assert_eq!(connected.status, ConnectionStatus::Connected);
        assert_eq!(connected.message, "Already connected");

        let connecting = ConnectionResult::still_connecting();
        assert_eq!(connecting.status, ConnectionStatus::Connecting);
        assert_eq!(connecting.action, ConnectionAction::None);
        assert_eq!(connecting.message, "Still connecting");
    }

    #[test]
    fn open_url_result_carries_url() {
        let result = ConnectionResult::open_url("https://auth.example/x");
        assert_eq!(result.status, ConnectionStatus::Connecting);
        assert_eq!(result.action, ConnectionAction::OpenUrl);
        assert_eq!(result.message, "https://auth.example/x");
    }

    #[test]
    fn filter_matches() {
        let info = ConnectionInfo {
            username: "alice".to_string(),
            connection_code: "main".to_string(),
            system_code: "SIMULATED".to_string(),
            system_name: "Simulated".to_string(),
            status: ConnectionStatus::Connected,
        };

        assert!(ConnectionFilter::default().matches(&info));
        assert!(
            ConnectionFilter {
                system_code: Some("SIMULATED".to_string()),
                status: None,
            }
            .matches(&info)
        );
        assert!(
            !ConnectionFilter {
                system_code: None,
                status: Some(ConnectionStatus::Error),
            }
            .matches(&info)
        );
    }

    #[test]
    fn spec_builder_fills_bags() {
        let spec = ConnectionSpec::new("broker-x")
            .with_config("endpoint", "https://api.example")
            .with_connect("otp", 123_456);

        assert_eq!(spec.system_code, "broker-x");
        assert_eq!(spec.config_params.len(), 1);
        assert_eq!(spec.connect_params["otp"], serde_json::json!(123_456));
    }
}
