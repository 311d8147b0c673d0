//! Broker Configuration Settings
//!
//! Configuration types for the connection broker, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::adapter::ProxyLoginTemplate;
use crate::infrastructure::broadcast::{DEFAULT_CHANGE_CAPACITY, MAX_CHANGE_CAPACITY};

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Credential refresh scheduler settings.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Run the scheduler at all.
    pub enabled: bool,
    /// Time between two scans.
    pub interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Refresh scheduler settings.
    pub refresh: RefreshSettings,
    /// Broker-hosted proxy login URL template.
    pub proxy_login: ProxyLoginTemplate,
    /// Capacity of the change broadcast channel.
    pub change_channel_capacity: usize,
    /// Register the built-in simulated adapter.
    pub simulated_adapter: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            refresh: RefreshSettings::default(),
            proxy_login: ProxyLoginTemplate::default(),
            change_channel_capacity: DEFAULT_CHANGE_CAPACITY,
            simulated_adapter: true,
        }
    }
}

impl BrokerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or malformed value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server = ServerSettings {
            health_port: parse_var(&lookup, "BROKER_HEALTH_PORT", defaults.server.health_port)?,
        };

        let refresh = RefreshSettings {
            enabled: parse_bool(&lookup, "BROKER_REFRESH_ENABLED", defaults.refresh.enabled)?,
            interval: Duration::from_secs(parse_var(
                &lookup,
                "BROKER_REFRESH_INTERVAL_SECS",
                defaults.refresh.interval.as_secs(),
            )?),
        };
        if refresh.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "BROKER_REFRESH_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let change_channel_capacity = parse_var(
            &lookup,
            "BROKER_CHANGE_CHANNEL_CAPACITY",
            defaults.change_channel_capacity,
        )?;
        if !(1..=MAX_CHANGE_CAPACITY).contains(&change_channel_capacity) {
            return Err(ConfigError::InvalidValue {
                var: "BROKER_CHANGE_CHANNEL_CAPACITY".to_string(),
                message: format!("must be between 1 and {MAX_CHANGE_CAPACITY}"),
            });
        }

        let proxy_login = match lookup("BROKER_PROXY_LOGIN_URL") {
            None => defaults.proxy_login,
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BROKER_PROXY_LOGIN_URL".to_string()));
            }
            Some(value) => ProxyLoginTemplate::parse(value)
                .map_err(|e| ConfigError::InvalidTemplate(e.to_string()))?,
        };

        Ok(Self {
            server,
            refresh,
            proxy_login,
            change_channel_capacity,
            simulated_adapter: parse_bool(
                &lookup,
                "BROKER_SIMULATED_ADAPTER",
                defaults.simulated_adapter,
            )?,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable cannot be parsed.
    #[error("environment variable {var} is invalid: {message}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// Error details.
        message: String,
    },
    /// The proxy login template is malformed.
    #[error("invalid proxy login URL template: {0}")]
    InvalidTemplate(String),
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };

    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        "" => Err(ConfigError::EmptyValue(key.to_string())),
        other => Err(ConfigError::InvalidValue {
            var: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = BrokerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.server.health_port, 8083);
        assert!(config.refresh.enabled);
        assert_eq!(config.refresh.interval, Duration::from_secs(60));
        assert_eq!(config.change_channel_capacity, 1024);
        assert!(config.simulated_adapter);
        assert_eq!(config.proxy_login, ProxyLoginTemplate::default());
    }

    #[test]
    fn overrides_from_variables() {
        let config = BrokerConfig::from_lookup(lookup(&[
            ("BROKER_HEALTH_PORT", "9000"),
            ("BROKER_REFRESH_ENABLED", "false"),
            ("BROKER_REFRESH_INTERVAL_SECS", "15"),
            ("BROKER_CHANGE_CHANNEL_CAPACITY", "64"),
            ("BROKER_SIMULATED_ADAPTER", "off"),
            (
                "BROKER_PROXY_LOGIN_URL",
                "https://broker.example/login/{username}/{connection_code}",
            ),
        ]))
        .unwrap();

        assert_eq!(config.server.health_port, 9000);
        assert!(!config.refresh.enabled);
        assert_eq!(config.refresh.interval, Duration::from_secs(15));
        assert_eq!(config.change_channel_capacity, 64);
        assert!(!config.simulated_adapter);
        assert_eq!(
            config.proxy_login.render("alice", "main"),
            "https://broker.example/login/alice/main"
        );
    }

    #[test_case("0" ; "zero")]
    #[test_case("1048577" ; "above maximum")]
    #[test_case("18446744073709551615" ; "usize max")]
    fn out_of_range_channel_capacity_is_rejected(value: &str) {
        let result =
            BrokerConfig::from_lookup(lookup(&[("BROKER_CHANGE_CHANNEL_CAPACITY", value)]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { var, .. }) if var == "BROKER_CHANGE_CHANNEL_CAPACITY"
        ));
    }

    #[test]
    fn largest_channel_capacity_is_accepted() {
        let max = MAX_CHANGE_CAPACITY.to_string();
        let config = BrokerConfig::from_lookup(lookup(&[(
            "BROKER_CHANGE_CHANNEL_CAPACITY",
            max.as_str(),
        )]))
        .unwrap();
        assert_eq!(config.change_channel_capacity, MAX_CHANGE_CAPACITY);
    }

    #[test]
    fn malformed_port_is_rejected() {
        let result = BrokerConfig::from_lookup(lookup(&[("BROKER_HEALTH_PORT", "http")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { var, .. }) if var == "BROKER_HEALTH_PORT"
        ));
    }

    #[test]
    fn empty_value_is_rejected() {
        let result = BrokerConfig::from_lookup(lookup(&[("BROKER_PROXY_LOGIN_URL", " ")]));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::EmptyValue("BROKER_PROXY_LOGIN_URL".to_string())
        );
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        let result = BrokerConfig::from_lookup(lookup(&[(
            "BROKER_PROXY_LOGIN_URL",
            "https://broker.example/login",
        )]));
        assert!(matches!(result, Err(ConfigError::InvalidTemplate(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result =
            BrokerConfig::from_lookup(lookup(&[("BROKER_REFRESH_INTERVAL_SECS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn bool_parsing() {
        let on = lookup(&[("X", "Yes")]);
        let bad = lookup(&[("X", "maybe")]);
        assert!(parse_bool(&on, "X", false).unwrap());
        assert!(parse_bool(&bad, "X", false).is_err());
        assert!(parse_bool(&bad, "MISSING", true).unwrap());
    }
}
