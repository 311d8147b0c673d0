//! Connection Registry
//!
//! Process-wide map from username to that user's connections.
//!
//! # Locking
//!
//! A single reader/writer lock guards the outer map and, by going through
//! it, every inner `UserConnections` map. All shape changes (insert,
//! replace, remove) happen inside one acquisition. Contexts are handed out
//! as `Arc`s so callers can drive adapters after the guard is released;
//! no method here awaits while holding the lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use super::{ConnectionContext, ConnectionStatus};

// =============================================================================
// User Connections
// =============================================================================

/// One user's contexts keyed by connection code.
#[derive(Debug, Default, Clone)]
pub struct UserConnections {
    contexts: HashMap<String, Arc<ConnectionContext>>,
}

impl UserConnections {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the context stored under a connection code.
    #[must_use]
    pub fn get(&self, connection_code: &str) -> Option<&Arc<ConnectionContext>> {
        self.contexts.get(connection_code)
    }

    /// Store a context under its connection code.
    ///
    /// Returns the context it replaced, if any.
    pub fn insert(&mut self, context: Arc<ConnectionContext>) -> Option<Arc<ConnectionContext>> {
        self.contexts
            .insert(context.connection_code().to_string(), context)
    }

    /// Remove the context stored under a connection code.
    pub fn remove(&mut self, connection_code: &str) -> Option<Arc<ConnectionContext>> {
        self.contexts.remove(connection_code)
    }

    /// Iterate over the contexts.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ConnectionContext>> {
        self.contexts.values()
    }

    /// Number of contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Check if the user has no contexts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Why a point lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryMiss {
    /// The user has never connected anything.
    #[error("Connection not found for user: {0}")]
    UnknownUser(String),
    /// The user has no context under that code.
    #[error("Connection not found: {0}")]
    UnknownConnection(String),
}

/// Registry-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Users with a registry entry.
    pub users: usize,
    /// Stored contexts.
    pub connections: usize,
    /// Contexts in `Disconnected`.
    pub disconnected: usize,
    /// Contexts in `Connecting`.
    pub connecting: usize,
    /// Contexts in `Connected`.
    pub connected: usize,
    /// Contexts in `Error`.
    pub error: usize,
}

impl RegistryStats {
    /// Count of contexts in a status.
    #[must_use]
    pub const fn count(&self, status: ConnectionStatus) -> usize {
        match status {
            ConnectionStatus::Disconnected => self.disconnected,
            ConnectionStatus::Connecting => self.connecting,
            ConnectionStatus::Connected => self.connected,
            ConnectionStatus::Error => self.error,
        }
    }

    fn record(&mut self, status: ConnectionStatus) {
        self.connections += 1;
        match status {
            ConnectionStatus::Disconnected => self.disconnected += 1,
            ConnectionStatus::Connecting => self.connecting += 1,
            ConnectionStatus::Connected => self.connected += 1,
            ConnectionStatus::Error => self.error += 1,
        }
    }
}

/// Thread-safe registry of every user's connections.
///
/// # Example
///
/// ```rust
/// use connection_broker::domain::connection::ConnectionRegistry;
///
/// let registry = ConnectionRegistry::new();
/// assert!(registry.lookup("alice").is_none());
///
/// registry.get_or_create("alice", |_connections| ());
/// assert!(registry.lookup("alice").is_some_and(|c| c.is_empty()));
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<String, UserConnections>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's connections.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<UserConnections> {
        self.users.read().get(username).cloned()
    }

    /// Run `f` on a user's connections under the write lock, creating the
    /// user's entry first if needed.
    ///
    /// `f` must not block: every other registry operation waits for it.
    pub fn get_or_create<R>(&self, username: &str, f: impl FnOnce(&mut UserConnections) -> R) -> R {
        let mut users = self.users.write();
        let connections = users.entry(username.to_string()).or_default();
        f(connections)
    }

    /// Find one context.
    ///
    /// # Errors
    ///
    /// Returns which level of the lookup missed.
    pub fn find(
        &self,
        username: &str,
        connection_code: &str,
    ) -> Result<Arc<ConnectionContext>, RegistryMiss> {
        let users = self.users.read();
        let connections = users
            .get(username)
            .ok_or_else(|| RegistryMiss::UnknownUser(username.to_string()))?;

        connections
            .get(connection_code)
            .cloned()
            .ok_or_else(|| RegistryMiss::UnknownConnection(connection_code.to_string()))
    }

    /// Remove a context, but only if the stored entry is still `expected`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn remove_if_same(
        &self,
        username: &str,
        connection_code: &str,
        expected: &Arc<ConnectionContext>,
    ) -> bool {
        let mut users = self.users.write();
        let Some(connections) = users.get_mut(username) else {
            return false;
        };

        match connections.get(connection_code) {
            Some(stored) if Arc::ptr_eq(stored, expected) => {
                connections.remove(connection_code);
                true
            }
            _ => false,
        }
    }

    /// Visit every (username, connection code, context) under the read lock.
    pub fn for_each(&self, mut f: impl FnMut(&str, &str, &Arc<ConnectionContext>)) {
        let users = self.users.read();
        for (username, connections) in users.iter() {
            for context in connections.iter() {
                f(username, context.connection_code(), context);
            }
        }
    }

    /// Find a context by its instance id.
    #[must_use]
    pub fn find_by_instance_id(&self, instance_id: Uuid) -> Option<Arc<ConnectionContext>> {
        let users = self.users.read();
        users
            .values()
            .flat_map(UserConnections::iter)
            .find(|context| context.instance_id() == instance_id)
            .cloned()
    }

    /// Registry-wide counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let users = self.users.read();
        let mut stats = RegistryStats {
            users: users.len(),
            ..RegistryStats::default()
        };

        for context in users.values().flat_map(UserConnections::iter) {
            stats.record(context.status());
        }

        stats
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adapter::AdapterFactory;
    use crate::domain::connection::{ContextOwner, Params};
    use crate::infrastructure::adapters::MockAdapterFactory;

    fn context(username: &str, code: &str) -> Arc<ConnectionContext> {
        let factory = MockAdapterFactory::new("broker-x", "Broker X");
        Arc::new(ConnectionContext::new(
            ContextOwner {
                username: username.to_string(),
                connection_code: code.to_string(),
                host: "localhost".to_string(),
            },
            factory.create(&Params::new()).unwrap(),
            Params::new(),
        ))
    }

    #[test]
    fn lookup_unknown_user() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup("alice").is_none());
    }

    #[test]
    fn get_or_create_creates_once() {
        let registry = ConnectionRegistry::new();

        registry.get_or_create("alice", |uc| uc.insert(context("alice", "main")));
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "backup")));

        let connections = registry.lookup("alice").unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(registry.stats().users, 1);
    }

    #[test]
    fn insert_overwrites_same_code() {
        let registry = ConnectionRegistry::new();
        let first = context("alice", "main");
        let second = context("alice", "main");

        registry.get_or_create("alice", |uc| uc.insert(Arc::clone(&first)));
        let replaced = registry.get_or_create("alice", |uc| uc.insert(Arc::clone(&second)));

        assert!(replaced.is_some_and(|r| Arc::ptr_eq(&r, &first)));
        let stored = registry.find("alice", "main").unwrap();
        assert!(Arc::ptr_eq(&stored, &second));
    }

    #[test]
    fn find_reports_which_level_missed() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.find("alice", "main").unwrap_err(),
            RegistryMiss::UnknownUser("alice".to_string())
        );

        registry.get_or_create("alice", |_| ());
        assert_eq!(
            registry.find("alice", "main").unwrap_err(),
            RegistryMiss::UnknownConnection("main".to_string())
        );
    }

    #[test]
    fn remove_if_same_ignores_replaced_entry() {
        let registry = ConnectionRegistry::new();
        let old = context("alice", "main");
        let new = context("alice", "main");
        registry.get_or_create("alice", |uc| uc.insert(Arc::clone(&new)));

        assert!(!registry.remove_if_same("alice", "main", &old));
        assert!(registry.find("alice", "main").is_ok());

        assert!(registry.remove_if_same("alice", "main", &new));
        assert!(registry.find("alice", "main").is_err());
    }

    #[test]
    fn remove_if_same_unknown_user() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove_if_same("ghost", "main", &context("ghost", "main")));
    }

    #[test]
    fn user_entry_survives_last_removal() {
        let registry = ConnectionRegistry::new();
        let ctx = context("alice", "main");
        registry.get_or_create("alice", |uc| uc.insert(Arc::clone(&ctx)));

        registry.remove_if_same("alice", "main", &ctx);

        assert!(registry.lookup("alice").is_some_and(|uc| uc.is_empty()));
    }

    #[test]
    fn for_each_visits_all_users() {
        let registry = ConnectionRegistry::new();
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "main")));
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "backup")));
        registry.get_or_create("bob", |uc| uc.insert(context("bob", "main")));

        let mut seen = Vec::new();
        registry.for_each(|user, code, _| seen.push(format!("{user}/{code}")));
        seen.sort();

        assert_eq!(seen, vec!["alice/backup", "alice/main", "bob/main"]);
    }

    #[test]
    fn find_by_instance_id_scans_users() {
        let registry = ConnectionRegistry::new();
        let target = context("bob", "main");
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "main")));
        registry.get_or_create("bob", |uc| uc.insert(Arc::clone(&target)));

        let found = registry.find_by_instance_id(target.instance_id()).unwrap();
        assert!(Arc::ptr_eq(&found, &target));
        assert!(registry.find_by_instance_id(Uuid::new_v4()).is_none());
    }

    #[test]
    fn stats_count_statuses() {
        let registry = ConnectionRegistry::new();
        let connected = context("alice", "main");
        connected.set_status(ConnectionStatus::Connected);
        let failed = context("bob", "main");
        failed.set_error("boom");
        registry.get_or_create("alice", |uc| uc.insert(connected));
        registry.get_or_create("bob", |uc| uc.insert(failed));
        registry.get_or_create("carol", |uc| uc.insert(context("carol", "main")));

        let stats = registry.stats();
        assert_eq!(stats.users, 3);
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.count(ConnectionStatus::Connected), 1);
        assert_eq!(stats.count(ConnectionStatus::Error), 1);
        assert_eq!(stats.count(ConnectionStatus::Disconnected), 1);
        assert_eq!(stats.count(ConnectionStatus::Connecting), 0);
    }

    #[test]
    fn lookup_returns_detached_snapshot() {
        let registry = ConnectionRegistry::new();
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "main")));

        let snapshot = registry.lookup("alice").unwrap();
        registry.get_or_create("alice", |uc| uc.insert(context("alice", "backup")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.lookup("alice").unwrap().len(), 2);
    }
}
