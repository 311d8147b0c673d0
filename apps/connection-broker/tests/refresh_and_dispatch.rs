//! Query Dispatch, Refresh and Health Integration Tests
//!
//! Exercises query routing to adapter sessions, delegated identities, the
//! credential refresh scheduler and the health endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use connection_broker::domain::market::AccountKind;
use connection_broker::infrastructure::adapters::{
    MockAdapterFactory, SIMULATED_SYSTEM_CODE, SimulatedAdapterFactory,
};
use connection_broker::infrastructure::health::router;
use connection_broker::{
    AdapterCatalog, AdapterError, ChangeBroadcaster, ConnectionRegistry, ConnectionService,
    ConnectionSpec, ConnectionStatus, HealthServerState, ProxyLoginTemplate, RefreshReport,
    RefreshScheduler, ServiceError, SessionIdentity, init_metrics,
};

fn service() -> Arc<ConnectionService> {
    let mut catalog = AdapterCatalog::new(ProxyLoginTemplate::default());
    catalog.register(Arc::new(SimulatedAdapterFactory::new()));
    Arc::new(ConnectionService::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::new(catalog),
        Arc::new(ChangeBroadcaster::with_defaults()),
    ))
}

fn alice() -> SessionIdentity {
    SessionIdentity::new("alice", "broker.test")
}

async fn connected(service: &ConnectionService, identity: &SessionIdentity, code: &str) {
    let result = service
        .connect(identity, code, ConnectionSpec::new(SIMULATED_SYSTEM_CODE))
        .await
        .unwrap();
    assert_eq!(result.status, ConnectionStatus::Connected);
}

// =============================================================================
// Query dispatch
// =============================================================================

#[tokio::test]
async fn market_queries_reach_the_session() {
    let service = service();
    connected(&service, &alice(), "main").await;

    let roots = service
        .get_root_symbols(&alice(), "main", "e")
        .await
        .unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].code, "ES");

    let gold = service.get_root_symbol(&alice(), "main", "GC").await.unwrap();
    assert_eq!(gold.exchange, "COMEX");

    let instruments = service
        .get_instruments(&alice(), "main", "CL")
        .await
        .unwrap();
    assert_eq!(instruments.len(), 5);
    assert!(instruments[0].continuous);
    assert!(instruments[1..].iter().all(|i| i.expiration_date.is_some()));

    let monday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let bars = service
        .get_price_bars(&alice(), "main", "ES1!", monday)
        .await
        .unwrap();
    assert_eq!(bars.bars.len(), 7);
    assert!(bars.bars.iter().all(|b| b.low <= b.open && b.open <= b.high));

    let saturday = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
    let weekend = service
        .get_price_bars(&alice(), "main", "ES1!", saturday)
        .await
        .unwrap();
    assert!(weekend.bars.is_empty());

    let last = service
        .get_price_bars(&alice(), "main", "ES1!", NaiveDate::MAX)
        .await
        .unwrap();
    assert_eq!(last.date, NaiveDate::MAX);
}

#[tokio::test]
async fn adapter_errors_pass_through_unchanged() {
    let service = service();
    connected(&service, &alice(), "main").await;

    let missing = service.get_root_symbol(&alice(), "main", "ZZ").await;

    assert_eq!(
        missing,
        Err(ServiceError::Adapter(AdapterError::NotFound {
            what: "root symbol ZZ".to_string(),
        }))
    );
}

#[tokio::test]
async fn queries_on_unknown_connections_are_not_found() {
    let service = service();
    connected(&service, &alice(), "main").await;

    let unknown_code = service.get_accounts(&alice(), "other").await;
    let unknown_user = service
        .get_accounts(&SessionIdentity::new("mallory", "broker.test"), "main")
        .await;

    assert!(unknown_code.unwrap_err().is_not_found());
    assert!(unknown_user.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delegated_identity_reads_the_principal_accounts() {
    let service = service();
    connected(&service, &alice(), "main").await;
    let support = SessionIdentity::new("support", "broker.test").on_behalf_of("alice");

    let accounts = service.get_accounts(&support, "main").await.unwrap();

    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].code, "SIM-alice");
    assert_eq!(accounts[0].kind, AccountKind::Demo);

    // Diagnostics stay bound to the caller's own connections.
    let diagnostic = service
        .test_adapter(&support, "main", "echo", "ping")
        .await;
    assert!(diagnostic.unwrap_err().is_not_found());
}

#[tokio::test]
async fn diagnostics_reach_the_session() {
    let service = service();
    connected(&service, &alice(), "main").await;

    let echo = service
        .test_adapter(&alice(), "main", "echo", "ping")
        .await
        .unwrap();
    let session = service
        .test_adapter(&alice(), "main", "session", "")
        .await
        .unwrap();

    assert_eq!(echo, "ping");
    assert!(session.starts_with("user=alice"));
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn expiring_tokens_are_renewed() {
    let service = service();
    let spec = ConnectionSpec::new(SIMULATED_SYSTEM_CODE)
        .with_config("token_ttl_secs", 2)
        .with_config("refresh_window_secs", 1);
    assert_ok!(service.connect(&alice(), "short", spec).await);
    connected(&service, &alice(), "long").await;

    let scheduler =
        RefreshScheduler::new(Arc::clone(&service), Duration::from_secs(60), CancellationToken::new());
    assert_eq!(scheduler.tick().await, RefreshReport::default());

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(scheduler.tick().await, RefreshReport { due: 1, failed: 0 });
    assert_eq!(scheduler.tick().await, RefreshReport::default());
    assert_eq!(service.registry_stats().connected, 2);
}

#[tokio::test]
async fn refresh_scan_spans_users() {
    let fresh = MockAdapterFactory::new("FRESH", "Fresh Tokens");
    let stale = MockAdapterFactory::new("STALE", "Stale Tokens");
    stale.set_needs_refresh(true);
    let mut catalog = AdapterCatalog::new(ProxyLoginTemplate::default());
    catalog.register(Arc::new(fresh.clone()));
    catalog.register(Arc::new(stale.clone()));
    let service = ConnectionService::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::new(catalog),
        Arc::new(ChangeBroadcaster::with_defaults()),
    );

    for (name, system) in [("alice", "STALE"), ("bob", "FRESH"), ("carol", "STALE")] {
        let identity = SessionIdentity::new(name, "broker.test");
        assert_ok!(service.connect(&identity, "main", ConnectionSpec::new(system)).await);
    }

    let mut due: Vec<String> = service
        .get_connections_to_refresh()
        .iter()
        .map(|context| context.username().to_string())
        .collect();
    due.sort();

    assert_eq!(due, vec!["alice", "carol"]);
}

// =============================================================================
// Health
// =============================================================================

async fn get(state: &Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
    let response = router(Arc::clone(state))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_and_metrics_reflect_the_registry() {
    init_metrics();
    let service = service();
    connected(&service, &alice(), "main").await;
    let state = Arc::new(HealthServerState::new("test".to_string(), Arc::clone(&service)));

    let (status, body) = get(&state, "/health").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], "test");
    assert_eq!(json["registry"]["connected"], 1);
    assert_eq!(json["systems"][0]["code"], SIMULATED_SYSTEM_CODE);

    let (status, body) = get(&state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("connection_broker_connections"));
    assert!(body.contains("connection_broker_connect_attempts_total"));
}
