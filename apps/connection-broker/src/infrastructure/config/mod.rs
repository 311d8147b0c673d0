//! Configuration Module
//!
//! Configuration loading for the broker service.

mod settings;

pub use settings::{BrokerConfig, ConfigError, RefreshSettings, ServerSettings};
