//! Connection Broker Binary
//!
//! Starts the connection broker: registry, change broadcaster, refresh
//! scheduler and health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin connection-broker
//! ```
//!
//! # Environment Variables
//!
//! - `BROKER_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `BROKER_REFRESH_ENABLED`: Run the credential refresh scheduler (default: true)
//! - `BROKER_REFRESH_INTERVAL_SECS`: Seconds between refresh scans (default: 60)
//! - `BROKER_PROXY_LOGIN_URL`: Proxy login URL template with `{username}` and
//!   `{connection_code}` placeholders
//! - `BROKER_CHANGE_CHANNEL_CAPACITY`: Change broadcast capacity, 1 to 1048576 (default: 1024)
//! - `BROKER_SIMULATED_ADAPTER`: Register the simulated exchange (default: true)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: cream-connection-broker)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use connection_broker::infrastructure::adapters::SimulatedAdapterFactory;
use connection_broker::infrastructure::health::{HealthServer, HealthServerState};
use connection_broker::infrastructure::telemetry;
use connection_broker::{
    AdapterCatalog, BrokerConfig, ChangeBroadcaster, ConnectionChange, ConnectionRegistry,
    ConnectionService, RefreshScheduler, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        trace_export = telemetry_guard.is_exporting(),
        "Starting Connection Broker"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BrokerConfig::from_env().context("invalid broker configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Register adapters
    let mut catalog = AdapterCatalog::new(config.proxy_login.clone());
    if config.simulated_adapter {
        catalog.register(Arc::new(SimulatedAdapterFactory::new()));
    }
    if catalog.is_empty() {
        tracing::warn!("No adapters registered, every connect will fail");
    }
    for system in catalog.systems() {
        tracing::info!(system_code = %system.code, system_name = %system.name, "Adapter registered");
    }

    // Change distribution
    let broadcaster = Arc::new(ChangeBroadcaster::new(config.change_channel_capacity));
    let change_rx = broadcaster.subscribe();
    tokio::spawn(log_changes(change_rx));

    let service = Arc::new(ConnectionService::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::new(catalog),
        broadcaster.clone(),
    ));

    // Spawn refresh scheduler
    let scheduler_handle = if config.refresh.enabled {
        let scheduler = RefreshScheduler::new(
            Arc::clone(&service),
            config.refresh.interval,
            shutdown_token.clone(),
        );
        Some(tokio::spawn(scheduler.run()))
    } else {
        tracing::info!("Refresh scheduler disabled");
        None
    };

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Connection broker ready");

    await_shutdown(shutdown_token).await;
    broadcaster.close();

    let drain = async {
        if let Some(handle) = scheduler_handle {
            let _ = handle.await;
        }
        let _ = health_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!(
        connections = service.registry_stats().connections,
        "Connection broker stopped"
    );
    Ok(())
}

/// Log every published connection change.
async fn log_changes(mut rx: broadcast::Receiver<ConnectionChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => {
                tracing::info!(
                    topic = change.topic(),
                    username = %change.username,
                    connection_code = %change.connection_code,
                    system_code = %change.system_code,
                    status = %change.status,
                    "Connection change"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Change log lagging, messages skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BrokerConfig) {
    tracing::info!(
        health_port = config.server.health_port,
        refresh_enabled = config.refresh.enabled,
        refresh_interval_secs = config.refresh.interval.as_secs(),
        change_channel_capacity = config.change_channel_capacity,
        simulated_adapter = config.simulated_adapter,
        "Configuration loaded"
    );
    tracing::debug!(
        proxy_login_url = %config.proxy_login.as_str(),
        "Proxy login template"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
