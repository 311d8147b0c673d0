//! Adapter Contract
//!
//! Every external trading/market-data system is reached through an adapter
//! implementing [`SystemAdapter`]. Adapters are built per connection by an
//! [`AdapterFactory`] registered in the [`AdapterCatalog`] under a system
//! code. The registry never sees concrete adapter types.

mod catalog;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::connection::Params;
use crate::domain::market::{Account, Instrument, PriceBars, RootSymbol};

pub use catalog::{AdapterCatalog, ProxyLoginTemplate, TemplateError};

/// Code and display name of an external system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// System code used for catalog lookup.
    pub code: String,
    /// Display name.
    pub name: String,
}

impl AdapterInfo {
    /// Create adapter info.
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// Result of an adapter's connect primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Session established.
    Connected,
    /// The user must log in at the system's own page.
    RedirectTo(String),
    /// The user must log in through the broker-hosted proxy page.
    ProxyLogin,
}

/// Everything an adapter needs to start a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Owning user.
    pub username: String,
    /// User-chosen connection code.
    pub connection_code: String,
    /// Originating host of the caller, for callback URLs.
    pub host: String,
    /// Static adapter configuration.
    pub config_params: Params,
    /// Per-attempt parameters.
    pub connect_params: Params,
}

/// Adapter error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// The external system refused the session.
    #[error("Connection rejected: {message}")]
    ConnectionRejected {
        /// Error details.
        message: String,
    },

    /// A configuration or connect parameter is missing or malformed.
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Error details.
        message: String,
    },

    /// The operation needs an established session.
    #[error("Adapter is not connected")]
    NotConnected,

    /// The adapter does not implement the operation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Operation name.
        operation: String,
    },

    /// The requested item does not exist upstream.
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The external system failed.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error details.
        message: String,
    },
}

/// Capabilities one adapter session provides.
///
/// Connect and disconnect may block on network I/O; the broker never calls
/// them while holding the registry lock. `needs_refresh` is polled under the
/// registry read lock and must not block.
#[async_trait]
pub trait SystemAdapter: Send + Sync {
    /// Code and name of the system.
    fn info(&self) -> AdapterInfo;

    /// Start a session.
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectOutcome, AdapterError>;

    /// Tear the session down.
    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Whether the session credentials are close to expiry.
    fn needs_refresh(&self) -> bool;

    /// Silently renew the session credentials.
    async fn refresh(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// List root symbols matching `filter`.
    async fn get_root_symbols(&self, filter: &str) -> Result<Vec<RootSymbol>, AdapterError>;

    /// Get one root symbol.
    async fn get_root_symbol(&self, root: &str) -> Result<RootSymbol, AdapterError>;

    /// List instruments of a root symbol.
    async fn get_instruments(&self, root: &str) -> Result<Vec<Instrument>, AdapterError>;

    /// Get the bars of `symbol` for `date`.
    async fn get_price_bars(&self, symbol: &str, date: NaiveDate)
    -> Result<PriceBars, AdapterError>;

    /// List the accounts reachable through the session.
    async fn get_accounts(&self) -> Result<Vec<Account>, AdapterError>;

    /// Run a raw diagnostic query against one of the adapter's services.
    async fn test_adapter(&self, service: &str, query: &str) -> Result<String, AdapterError>;
}

/// Builds adapter sessions for one system code.
pub trait AdapterFactory: Send + Sync {
    /// Code and name of the system.
    fn info(&self) -> AdapterInfo;

    /// Build a session from the static configuration bag.
    ///
    /// Must not perform network I/O: it runs under the registry write lock.
    fn create(&self, config_params: &Params) -> Result<Arc<dyn SystemAdapter>, AdapterError>;
}

/// Read a string parameter.
#[must_use]
pub fn param_str<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params.get(name).and_then(serde_json::Value::as_str)
}

/// Read an unsigned integer parameter, accepting numbers and numeric strings.
///
/// # Errors
///
/// Returns `InvalidParameter` if the value is present but not a non-negative integer.
pub fn param_u64(params: &Params, name: &str) -> Result<Option<u64>, AdapterError> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };

    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .map(Some)
        .ok_or_else(|| AdapterError::InvalidParameter {
            name: name.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
}
