//! Prometheus Metrics Module
//!
//! Exposes broker metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connects**: Connect attempts by system and outcome
//! - **Disconnects**: Completed disconnects by system
//! - **Notifications**: Failed change publishes by operation
//! - **Refresh**: Credential refresh results by system
//! - **Connections**: Stored connections by status
//! - **Latency**: Adapter connect round-trip
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::{ConnectionStatus, RegistryStats};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "connection_broker_connect_attempts_total",
        "Connect calls by system and outcome"
    );
    describe_counter!(
        "connection_broker_disconnects_total",
        "Connections removed by Disconnect"
    );
    describe_counter!(
        "connection_broker_publish_failures_total",
        "Change notifications that could not be published"
    );
    describe_counter!(
        "connection_broker_refresh_total",
        "Credential refresh attempts by system and result"
    );

    describe_gauge!(
        "connection_broker_connections",
        "Stored connections by status"
    );

    describe_histogram!(
        "connection_broker_adapter_connect_seconds",
        "Duration of the adapter connect primitive"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for connect outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcomeLabel {
    /// Connected immediately.
    Connected,
    /// Redirected to the system's login page.
    Redirect,
    /// Redirected to the broker-hosted login page.
    ProxyLogin,
    /// Routine failure reported in the result.
    Error,
    /// Short-circuit on a connected entry.
    AlreadyConnected,
    /// Short-circuit on a connecting entry.
    StillConnecting,
}

impl ConnectOutcomeLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Redirect => "redirect",
            Self::ProxyLogin => "proxy_login",
            Self::Error => "error",
            Self::AlreadyConnected => "already_connected",
            Self::StillConnecting => "still_connecting",
        }
    }
}

/// Operations that publish change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOperation {
    /// Connect.
    Connect,
    /// Disconnect.
    Disconnect,
    /// Out-of-band handshake completion.
    Handshake,
    /// Scheduled refresh.
    Refresh,
}

impl PublishOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Handshake => "handshake",
            Self::Refresh => "refresh",
        }
    }
}

/// Record a Connect call.
pub fn record_connect_attempt(system: &str, outcome: ConnectOutcomeLabel) {
    counter!(
        "connection_broker_connect_attempts_total",
        "system" => system.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a completed Disconnect.
pub fn record_disconnect(system: &str) {
    counter!(
        "connection_broker_disconnects_total",
        "system" => system.to_string()
    )
    .increment(1);
}

/// Record a failed change publish.
pub fn record_publish_failure(operation: PublishOperation) {
    counter!(
        "connection_broker_publish_failures_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record a refresh attempt.
pub fn record_refresh(system: &str, success: bool) {
    counter!(
        "connection_broker_refresh_total",
        "system" => system.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Update the per-status connection gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(stats: &RegistryStats) {
    for status in ConnectionStatus::all() {
        gauge!(
            "connection_broker_connections",
            "status" => status.as_str()
        )
        .set(stats.count(*status) as f64);
    }
}

/// Record the duration of an adapter connect.
pub fn record_adapter_connect_duration(system: &str, duration: Duration) {
    histogram!(
        "connection_broker_adapter_connect_seconds",
        "system" => system.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
