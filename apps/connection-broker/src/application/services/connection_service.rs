//! Connection Service
//!
//! The operation surface of the broker: connect/disconnect orchestration,
//! listings, the refresh scan and query dispatch.
//!
//! # Locking
//!
//! Connect admission (short-circuit check, adapter resolution, context
//! creation and insertion) runs inside one registry write section, so two
//! racing Connect calls for the same (user, code) cannot both reach the
//! adapter. Adapter network calls always run after the guard is released.
//! Disconnect removes the entry under the write lock and only then calls
//! the adapter.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::application::ports::ConnectionChangePublisher;
use crate::domain::adapter::{AdapterCatalog, AdapterError, ConnectOutcome};
use crate::domain::connection::{
    ConnectionChange, ConnectionContext, ConnectionFilter, ConnectionInfo, ConnectionRegistry,
    ConnectionResult, ConnectionSpec, ConnectionStatus, ContextOwner, RegistryMiss,
    RegistryStats, SessionIdentity,
};
use crate::domain::market::{Account, Instrument, PriceBars, RootSymbol};
use crate::error::ServiceError;
use crate::infrastructure::metrics::{self, ConnectOutcomeLabel, PublishOperation};

/// What connect admission decided under the registry lock.
enum Admission {
    /// An existing live entry answers the call.
    ShortCircuit(ConnectionResult),
    /// The system code is not in the catalog.
    UnknownSystem,
    /// The factory refused the configuration.
    Rejected(AdapterError),
    /// A fresh context was stored and marked `Connecting`.
    Fresh(Arc<ConnectionContext>),
}

/// Message stored on a context whose connect never finished.
pub const CONNECT_INTERRUPTED: &str = "connect interrupted";

/// Moves a pre-marked `Connecting` context to `Error` if the adapter call
/// is dropped or panics before it settles.
struct PendingConnect<'a> {
    context: &'a ConnectionContext,
    armed: bool,
}

impl<'a> PendingConnect<'a> {
    const fn new(context: &'a ConnectionContext) -> Self {
        Self {
            context,
            armed: true,
        }
    }

    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.armed && self.context.is_connecting() {
            tracing::warn!(
                username = %self.context.username(),
                connection_code = %self.context.connection_code(),
                "Connect interrupted before the adapter answered"
            );
            self.context.set_error(CONNECT_INTERRUPTED);
        }
    }
}

/// Public operation surface of the connection broker.
pub struct ConnectionService {
    registry: Arc<ConnectionRegistry>,
    catalog: Arc<AdapterCatalog>,
    publisher: Arc<dyn ConnectionChangePublisher>,
}

impl ConnectionService {
    /// Create a new connection service.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        catalog: Arc<AdapterCatalog>,
        publisher: Arc<dyn ConnectionChangePublisher>,
    ) -> Self {
        Self {
            registry,
            catalog,
            publisher,
        }
    }

    /// The registry this service drives.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The adapter catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<AdapterCatalog> {
        &self.catalog
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Connect the caller's `connection_code` to the system named in `spec`.
    ///
    /// Routine adapter failures are returned as a result with status
    /// `Error`, not as an `Err`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the connection code is empty
    /// - `SystemNotFound` if the system code is not registered
    /// - `ServerError` if the change notification could not be published;
    ///   the context stays stored
    pub async fn connect(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        spec: ConnectionSpec,
    ) -> Result<ConnectionResult, ServiceError> {
        validate_connection_code(connection_code)?;
        let username = identity.username();
        let system_code = spec.system_code.as_str();

        // 1. Admission: atomic with respect to other registry callers
        let admission = self.registry.get_or_create(username, |connections| {
            if let Some(existing) = connections.get(connection_code) {
                let status = existing.status();
                if status.is_live() {
                    return Admission::ShortCircuit(if status == ConnectionStatus::Connected {
                        ConnectionResult::already_connected()
                    } else {
                        ConnectionResult::still_connecting()
                    });
                }
            }

            let Some(factory) = self.catalog.resolve(system_code) else {
                return Admission::UnknownSystem;
            };

            match factory.create(&spec.config_params) {
                Ok(adapter) => {
                    let owner = ContextOwner {
                        username: username.to_string(),
                        connection_code: connection_code.to_string(),
                        host: identity.host().to_string(),
                    };
                    let context = Arc::new(ConnectionContext::new(
                        owner,
                        adapter,
                        spec.config_params.clone(),
                    ));
                    context.begin_connect();
                    connections.insert(Arc::clone(&context));
                    Admission::Fresh(context)
                }
                Err(e) => Admission::Rejected(e),
            }
        });

        let context = match admission {
            Admission::ShortCircuit(result) => {
                tracing::debug!(
                    username = %username,
                    connection_code = %connection_code,
                    status = %result.status,
                    "Connect short-circuited on existing entry"
                );
                let label = if result.status == ConnectionStatus::Connected {
                    ConnectOutcomeLabel::AlreadyConnected
                } else {
                    ConnectOutcomeLabel::StillConnecting
                };
                metrics::record_connect_attempt(system_code, label);
                return Ok(result);
            }
            Admission::UnknownSystem => {
                return Err(ServiceError::SystemNotFound(system_code.to_string()));
            }
            Admission::Rejected(e) => {
                tracing::info!(
                    username = %username,
                    connection_code = %connection_code,
                    system_code = %system_code,
                    error = %e,
                    "Adapter refused the connection configuration"
                );
                metrics::record_connect_attempt(system_code, ConnectOutcomeLabel::Error);
                return Ok(ConnectionResult::error(e.to_string()));
            }
            Admission::Fresh(context) => context,
        };

        // 2. Handshake, outside the registry lock
        let pending = PendingConnect::new(&context);
        let started = Instant::now();
        let outcome = context.connect(&spec.connect_params).await;
        pending.settle();
        metrics::record_adapter_connect_duration(system_code, started.elapsed());

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::info!(
                    username = %username,
                    connection_code = %connection_code,
                    system_code = %system_code,
                    error = %e,
                    "Connect failed"
                );
                metrics::record_connect_attempt(system_code, ConnectOutcomeLabel::Error);
                return Ok(ConnectionResult::error(e.to_string()));
            }
        };

        // 3. Map the outcome
        let (result, label) = match outcome {
            ConnectOutcome::Connected => {
                (ConnectionResult::connected(), ConnectOutcomeLabel::Connected)
            }
            ConnectOutcome::RedirectTo(url) => {
                (ConnectionResult::open_url(url), ConnectOutcomeLabel::Redirect)
            }
            ConnectOutcome::ProxyLogin => {
                let url = self.catalog.proxy_login_url(username, connection_code);
                context.set_authorization_url(url.clone());
                (ConnectionResult::open_url(url), ConnectOutcomeLabel::ProxyLogin)
            }
        };

        // 4. Announce
        self.announce(&context, context.status(), PublishOperation::Connect)
            .await?;

        tracing::info!(
            username = %username,
            connection_code = %connection_code,
            system_code = %system_code,
            status = %result.status,
            "Connection established"
        );
        metrics::record_connect_attempt(system_code, label);
        Ok(result)
    }

    /// Disconnect the caller's `connection_code`.
    ///
    /// A known user without an entry for the code, or an entry already
    /// `Disconnected`, is a no-op success. The adapter's cleanup runs last
    /// and its failure is logged and ignored: once the entry is gone the
    /// disconnect has happened.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the connection code is empty
    /// - `NotFound` if the user has no registry entry
    /// - `ServerError` if the change notification could not be published;
    ///   the entry is left in place
    pub async fn disconnect(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
    ) -> Result<(), ServiceError> {
        validate_connection_code(connection_code)?;
        let username = identity.username();

        let context = match self.registry.find(username, connection_code) {
            Ok(context) => context,
            Err(RegistryMiss::UnknownConnection(_)) => {
                tracing::debug!(
                    username = %username,
                    connection_code = %connection_code,
                    "Disconnect on absent connection"
                );
                return Ok(());
            }
            Err(miss) => return Err(miss.into()),
        };

        if context.is_disconnected() {
            return Ok(());
        }

        self.announce(&context, ConnectionStatus::Disconnected, PublishOperation::Disconnect)
            .await?;

        if !self
            .registry
            .remove_if_same(username, connection_code, &context)
        {
            tracing::debug!(
                username = %username,
                connection_code = %connection_code,
                "Entry replaced while disconnecting"
            );
        }

        let system_code = context.adapter_info().code;
        if let Err(e) = context.disconnect().await {
            tracing::warn!(
                username = %username,
                connection_code = %connection_code,
                system_code = %system_code,
                error = %e,
                "Adapter cleanup failed on disconnect"
            );
        }

        tracing::info!(
            username = %username,
            connection_code = %connection_code,
            system_code = %system_code,
            "Connection removed"
        );
        metrics::record_disconnect(&system_code);
        Ok(())
    }

    /// Drive an in-flight handshake to its end after an out-of-band
    /// callback (for example an OAuth redirect).
    ///
    /// # Errors
    ///
    /// - `NotFound` if no context has this instance id
    /// - `InvalidRequest` if the context is not `Connecting`
    /// - `ServerError` if the change notification could not be published
    pub async fn complete_handshake(
        &self,
        instance_id: Uuid,
        outcome: Result<(), AdapterError>,
    ) -> Result<ConnectionStatus, ServiceError> {
        let context = self.find_by_instance_id(instance_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Connection instance not found: {instance_id}"))
        })?;

        if !context.is_connecting() {
            return Err(ServiceError::InvalidRequest(format!(
                "Connection {} is {}, not connecting",
                context.connection_code(),
                context.status()
            )));
        }

        match outcome {
            Ok(()) => context.set_status(ConnectionStatus::Connected),
            Err(e) => context.set_error(e.to_string()),
        }
        let status = context.status();

        self.announce(&context, status, PublishOperation::Handshake)
            .await?;

        tracing::info!(
            username = %context.username(),
            connection_code = %context.connection_code(),
            status = %status,
            "Handshake completed"
        );
        Ok(status)
    }

    /// Renew one connection's credentials.
    ///
    /// On failure the context is marked `Error` and the change is announced.
    /// A failed announcement is only logged.
    ///
    /// # Errors
    ///
    /// Returns the adapter's refresh error.
    pub async fn refresh_connection(
        &self,
        context: &Arc<ConnectionContext>,
    ) -> Result<(), AdapterError> {
        let system_code = context.adapter_info().code;
        let result = context.refresh().await;
        metrics::record_refresh(&system_code, result.is_ok());

        if let Err(e) = &result {
            tracing::warn!(
                username = %context.username(),
                connection_code = %context.connection_code(),
                system_code = %system_code,
                error = %e,
                "Credential refresh failed"
            );
            // Publish failure is already logged by announce.
            let _ = self
                .announce(context, ConnectionStatus::Error, PublishOperation::Refresh)
                .await;
        }

        result
    }

    async fn announce(
        &self,
        context: &ConnectionContext,
        status: ConnectionStatus,
        operation: PublishOperation,
    ) -> Result<(), ServiceError> {
        let change = ConnectionChange::of(context, status);
        self.publisher.publish(change).await.map_err(|e| {
            tracing::error!(
                username = %context.username(),
                connection_code = %context.connection_code(),
                status = %status,
                error = %e,
                "Could not publish the change message"
            );
            metrics::record_publish_failure(operation);
            ServiceError::from(e)
        })
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// List the caller's connections, sorted by connection code.
    ///
    /// `limit == 0` means no limit.
    #[must_use]
    pub fn get_connections(
        &self,
        identity: &SessionIdentity,
        filter: &ConnectionFilter,
        offset: usize,
        limit: usize,
    ) -> Vec<ConnectionInfo> {
        let Some(connections) = self.registry.lookup(identity.username()) else {
            return Vec::new();
        };

        let mut infos: Vec<ConnectionInfo> = connections
            .iter()
            .map(|context| {
                let info = context.adapter_info();
                ConnectionInfo {
                    username: context.username().to_string(),
                    connection_code: context.connection_code().to_string(),
                    system_code: info.code,
                    system_name: info.name,
                    status: context.status(),
                }
            })
            .filter(|info| filter.matches(info))
            .collect();
        infos.sort_by(|a, b| a.connection_code.cmp(&b.connection_code));

        let page = infos.into_iter().skip(offset);
        if limit == 0 {
            page.collect()
        } else {
            page.take(limit).collect()
        }
    }

    /// Every connection, across users, whose credentials need a refresh.
    #[must_use]
    pub fn get_connections_to_refresh(&self) -> Vec<Arc<ConnectionContext>> {
        let mut due = Vec::new();
        self.registry.for_each(|_, _, context| {
            if context.needs_refresh() {
                due.push(Arc::clone(context));
            }
        });
        due
    }

    /// Find a context by instance id, across users.
    #[must_use]
    pub fn find_by_instance_id(&self, instance_id: Uuid) -> Option<Arc<ConnectionContext>> {
        self.registry.find_by_instance_id(instance_id)
    }

    /// Registry-wide counts.
    #[must_use]
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    // =========================================================================
    // Query Dispatch
    // =========================================================================

    /// List root symbols matching `filter`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn get_root_symbols(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        filter: &str,
    ) -> Result<Vec<RootSymbol>, ServiceError> {
        let context = self.delegated_context(identity, connection_code)?;
        Ok(context.get_root_symbols(filter).await?)
    }

    /// Get one root symbol.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn get_root_symbol(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        root: &str,
    ) -> Result<RootSymbol, ServiceError> {
        let context = self.delegated_context(identity, connection_code)?;
        Ok(context.get_root_symbol(root).await?)
    }

    /// List the instruments of a root symbol.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn get_instruments(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        root: &str,
    ) -> Result<Vec<Instrument>, ServiceError> {
        let context = self.delegated_context(identity, connection_code)?;
        Ok(context.get_instruments(root).await?)
    }

    /// Get the bars of `symbol` for `date`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn get_price_bars(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<PriceBars, ServiceError> {
        let context = self.delegated_context(identity, connection_code)?;
        Ok(context.get_price_bars(symbol, date).await?)
    }

    /// List the accounts of a connection.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn get_accounts(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
    ) -> Result<Vec<Account>, ServiceError> {
        let context = self.delegated_context(identity, connection_code)?;
        Ok(context.get_accounts().await?)
    }

    /// Run a raw diagnostic query on one of the caller's own connections.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, otherwise the adapter error.
    pub async fn test_adapter(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
        service: &str,
        query: &str,
    ) -> Result<String, ServiceError> {
        let context = self
            .registry
            .find(identity.username(), connection_code)?;
        Ok(context.test_adapter(service, query).await?)
    }

    /// Market-data and account queries go to the on-behalf-of user's map.
    fn delegated_context(
        &self,
        identity: &SessionIdentity,
        connection_code: &str,
    ) -> Result<Arc<ConnectionContext>, ServiceError> {
        Ok(self
            .registry
            .find(identity.on_behalf_of_user(), connection_code)?)
    }
}

impl std::fmt::Debug for ConnectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionService")
            .field("registry", &self.registry)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

fn validate_connection_code(connection_code: &str) -> Result<(), ServiceError> {
    if connection_code.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "connection code must not be empty".to_string(),
        ));
    }
    Ok(())
}
