//! Adapter catalog: system code → adapter factory.
//!
//! Built once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::{AdapterFactory, AdapterInfo};

const USERNAME_PLACEHOLDER: &str = "{username}";
const CONNECTION_CODE_PLACEHOLDER: &str = "{connection_code}";

/// Default broker-hosted login page.
pub const DEFAULT_PROXY_LOGIN_URL: &str =
    "https://localhost:8449/api/system/v1/weblogin/{username}/{connection_code}/login";

/// Template error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A required placeholder is absent.
    #[error("proxy login template must contain {0}")]
    MissingPlaceholder(&'static str),
}

/// URL template of the broker-hosted proxy login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLoginTemplate(String);

impl ProxyLoginTemplate {
    /// Validate and wrap a template.
    ///
    /// # Errors
    ///
    /// Returns an error if `{username}` or `{connection_code}` is missing.
    pub fn parse(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        for placeholder in [USERNAME_PLACEHOLDER, CONNECTION_CODE_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self(template))
    }

    /// Render the login URL for one connection.
    #[must_use]
    pub fn render(&self, username: &str, connection_code: &str) -> String {
        self.0
            .replace(USERNAME_PLACEHOLDER, username)
            .replace(CONNECTION_CODE_PLACEHOLDER, connection_code)
    }

    /// The raw template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProxyLoginTemplate {
    fn default() -> Self {
        Self(DEFAULT_PROXY_LOGIN_URL.to_string())
    }
}

/// Registered adapter factories.
///
/// # Example
///
/// ```rust
/// use connection_broker::domain::adapter::{AdapterCatalog, ProxyLoginTemplate};
/// use connection_broker::infrastructure::adapters::SimulatedAdapterFactory;
/// use std::sync::Arc;
///
/// let mut catalog = AdapterCatalog::new(ProxyLoginTemplate::default());
/// catalog.register(Arc::new(SimulatedAdapterFactory::new()));
///
/// assert!(catalog.resolve("SIMULATED").is_some());
/// assert!(catalog.resolve("UNKNOWN").is_none());
/// ```
pub struct AdapterCatalog {
    factories: HashMap<String, Arc<dyn AdapterFactory>>,
    proxy_login: ProxyLoginTemplate,
}

impl AdapterCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new(proxy_login: ProxyLoginTemplate) -> Self {
        Self {
            factories: HashMap::new(),
            proxy_login,
        }
    }

    /// Register a factory, replacing any factory with the same code.
    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        let info = factory.info();
        tracing::debug!(system_code = %info.code, system_name = %info.name, "Adapter registered");
        self.factories.insert(info.code, factory);
    }

    /// Look up the factory of a system.
    #[must_use]
    pub fn resolve(&self, system_code: &str) -> Option<Arc<dyn AdapterFactory>> {
        self.factories.get(system_code).cloned()
    }

    /// All registered systems, sorted by code.
    #[must_use]
    pub fn systems(&self) -> Vec<AdapterInfo> {
        let mut systems: Vec<_> = self.factories.values().map(|f| f.info()).collect();
        systems.sort_by(|a, b| a.code.cmp(&b.code));
        systems
    }

    /// Broker-hosted login URL for a proxied handshake.
    #[must_use]
    pub fn proxy_login_url(&self, username: &str, connection_code: &str) -> String {
        self.proxy_login.render(username, connection_code)
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for AdapterCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCatalog")
            .field("systems", &self.systems())
            .field("proxy_login", &self.proxy_login)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::MockAdapterFactory;

    #[test]
    fn template_requires_placeholders() {
        assert_eq!(
            ProxyLoginTemplate::parse("https://broker/login/{connection_code}"),
            Err(TemplateError::MissingPlaceholder("{username}"))
        );
        assert_eq!(
            ProxyLoginTemplate::parse("https://broker/login/{username}"),
            Err(TemplateError::MissingPlaceholder("{connection_code}"))
        );
    }

    #[test]
    fn template_renders_both_placeholders() {
        let template = ProxyLoginTemplate::parse(
            "https://broker:8449/weblogin/{username}/{connection_code}/login",
        )
        .unwrap();

        assert_eq!(
            template.render("alice", "main"),
            "https://broker:8449/weblogin/alice/main/login"
        );
    }

    #[test]
    fn default_template_is_valid() {
        let template = ProxyLoginTemplate::default();
        assert!(ProxyLoginTemplate::parse(template.as_str()).is_ok());
    }

    #[test]
    fn register_and_resolve() {
        let mut catalog = AdapterCatalog::new(ProxyLoginTemplate::default());
        assert!(catalog.is_empty());

        catalog.register(Arc::new(MockAdapterFactory::new("broker-x", "Broker X")));
        catalog.register(Arc::new(MockAdapterFactory::new("broker-a", "Broker A")));

        assert_eq!(catalog.len(), 2);
        assert!(catalog.resolve("broker-x").is_some());
        assert!(catalog.resolve("broker-y").is_none());

        let codes: Vec<_> = catalog.systems().into_iter().map(|s| s.code).collect();
        assert_eq!(codes, vec!["broker-a".to_string(), "broker-x".to_string()]);
    }

    #[test]
    fn register_replaces_same_code() {
        let mut catalog = AdapterCatalog::new(ProxyLoginTemplate::default());
        catalog.register(Arc::new(MockAdapterFactory::new("broker-x", "Old")));
        catalog.register(Arc::new(MockAdapterFactory::new("broker-x", "New")));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.systems()[0].name, "New");
    }
}
