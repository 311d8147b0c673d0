//! Connection Context
//!
//! One adapter session for a (user, connection code) pair, plus the status
//! of that session. Contexts are shared (`Arc`) between the registry, the
//! service, the refresh scanner and concurrent queries; every status
//! transition is a single write behind its own lock so readers never see a
//! torn state.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ConnectionStatus, Params};
use crate::domain::adapter::{
    AdapterError, AdapterInfo, ConnectOutcome, ConnectRequest, SystemAdapter,
};
use crate::domain::market::{Account, Instrument, PriceBars, RootSymbol};

/// Who a context belongs to and where the connect call came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOwner {
    /// Owning user.
    pub username: String,
    /// User-chosen connection code.
    pub connection_code: String,
    /// Originating host of the connect call.
    pub host: String,
}

/// A user's session with one external system.
pub struct ConnectionContext {
    instance_id: Uuid,
    owner: ContextOwner,
    info: AdapterInfo,
    adapter: Arc<dyn SystemAdapter>,
    config_params: Params,
    status: RwLock<ConnectionStatus>,
    authorization_url: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
}

impl ConnectionContext {
    /// Bind a fresh adapter session to its owner. Starts `Disconnected`.
    #[must_use]
    pub fn new(owner: ContextOwner, adapter: Arc<dyn SystemAdapter>, config_params: Params) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            info: adapter.info(),
            owner,
            adapter,
            config_params,
            status: RwLock::new(ConnectionStatus::Disconnected),
            authorization_url: RwLock::new(None),
            last_error: RwLock::new(None),
            connected_at: RwLock::new(None),
        }
    }

    /// Unique id of this context instance.
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Owning user.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.owner.username
    }

    /// User-chosen connection code.
    #[must_use]
    pub fn connection_code(&self) -> &str {
        &self.owner.connection_code
    }

    /// Originating host of the connect call.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.owner.host
    }

    /// Code and name of the bound system.
    #[must_use]
    pub fn adapter_info(&self) -> AdapterInfo {
        self.info.clone()
    }

    /// When the session last became `Connected`.
    #[must_use]
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Check if the session is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Check if a handshake is in progress.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionStatus::Connecting
    }

    /// Check if there is no session.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.status() == ConnectionStatus::Disconnected
    }

    /// Authorization URL of an in-flight handshake.
    #[must_use]
    pub fn authorization_url(&self) -> Option<String> {
        self.authorization_url.read().clone()
    }

    /// Message of the last failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Set the status.
    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
        match status {
            ConnectionStatus::Connected => {
                *self.connected_at.write() = Some(Utc::now());
                *self.authorization_url.write() = None;
                *self.last_error.write() = None;
            }
            ConnectionStatus::Disconnected => {
                *self.authorization_url.write() = None;
            }
            ConnectionStatus::Connecting | ConnectionStatus::Error => {}
        }
    }

    /// Set an error status with message.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
        *self.status.write() = ConnectionStatus::Error;
    }

    /// Store the URL the user must visit to finish the handshake.
    pub fn set_authorization_url(&self, url: impl Into<String>) {
        *self.authorization_url.write() = Some(url.into());
    }

    /// Enter `Connecting` ahead of the adapter call.
    pub fn begin_connect(&self) {
        *self.authorization_url.write() = None;
        *self.last_error.write() = None;
        *self.status.write() = ConnectionStatus::Connecting;
    }

    /// Run the adapter's connect primitive and record the resulting status.
    ///
    /// # Errors
    ///
    /// Returns the adapter error; the context is left in `Error`.
    pub async fn connect(&self, connect_params: &Params) -> Result<ConnectOutcome, AdapterError> {
        let request = ConnectRequest {
            username: self.owner.username.clone(),
            connection_code: self.owner.connection_code.clone(),
            host: self.owner.host.clone(),
            config_params: self.config_params.clone(),
            connect_params: connect_params.clone(),
        };

        match self.adapter.connect(&request).await {
            Ok(ConnectOutcome::Connected) => {
                self.set_status(ConnectionStatus::Connected);
                Ok(ConnectOutcome::Connected)
            }
            Ok(ConnectOutcome::RedirectTo(url)) => {
                self.set_authorization_url(url.clone());
                self.set_status(ConnectionStatus::Connecting);
                Ok(ConnectOutcome::RedirectTo(url))
            }
            Ok(ConnectOutcome::ProxyLogin) => {
                self.set_status(ConnectionStatus::Connecting);
                Ok(ConnectOutcome::ProxyLogin)
            }
            Err(e) => {
                self.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Run the adapter's disconnect primitive. The context ends up
    /// `Disconnected` whatever the adapter reports.
    ///
    /// # Errors
    ///
    /// Returns the adapter's cleanup error.
    pub async fn disconnect(&self) -> Result<(), AdapterError> {
        let result = self.adapter.disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
        result
    }

    /// Whether this live session needs a credential refresh.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.is_connected() && self.adapter.needs_refresh()
    }

    /// Renew the session credentials.
    ///
    /// # Errors
    ///
    /// Returns the adapter error; the context is left in `Error`.
    pub async fn refresh(&self) -> Result<(), AdapterError> {
        self.adapter.refresh().await.inspect_err(|e| {
            self.set_error(e.to_string());
        })
    }

    /// List root symbols matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn get_root_symbols(&self, filter: &str) -> Result<Vec<RootSymbol>, AdapterError> {
        self.adapter.get_root_symbols(filter).await
    }

    /// Get one root symbol.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn get_root_symbol(&self, root: &str) -> Result<RootSymbol, AdapterError> {
        self.adapter.get_root_symbol(root).await
    }

    /// List instruments of a root symbol.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn get_instruments(&self, root: &str) -> Result<Vec<Instrument>, AdapterError> {
        self.adapter.get_instruments(root).await
    }

    /// Get the bars of `symbol` for `date`.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn get_price_bars(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<PriceBars, AdapterError> {
        self.adapter.get_price_bars(symbol, date).await
    }

    /// List the accounts of the session.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn get_accounts(&self) -> Result<Vec<Account>, AdapterError> {
        self.adapter.get_accounts().await
    }

    /// Run a raw diagnostic query.
    ///
    /// # Errors
    ///
    /// Returns the adapter error unmodified.
    pub async fn test_adapter(&self, service: &str, query: &str) -> Result<String, AdapterError> {
        self.adapter.test_adapter(service, query).await
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("instance_id", &self.instance_id)
            .field("username", &self.owner.username)
            .field("connection_code", &self.owner.connection_code)
            .field("system_code", &self.info.code)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
