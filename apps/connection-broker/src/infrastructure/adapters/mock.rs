//! Mock Adapter
//!
//! Scriptable adapter for testing. All sessions created by one
//! `MockAdapterFactory` share its script and counters, so a test can hold
//! the factory and observe what the broker did with the sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Notify, Semaphore};

use crate::domain::adapter::{
    AdapterError, AdapterFactory, AdapterInfo, ConnectOutcome, ConnectRequest, SystemAdapter,
};
use crate::domain::connection::Params;
use crate::domain::market::{
    Account, AccountKind, Instrument, PriceBar, PriceBars, RootSymbol,
};

#[derive(Debug)]
struct MockScript {
    outcome: RwLock<ConnectOutcome>,
    create_error: RwLock<Option<AdapterError>>,
    connect_error: RwLock<Option<AdapterError>>,
    disconnect_error: RwLock<Option<AdapterError>>,
    refresh_error: RwLock<Option<AdapterError>>,
    needs_refresh: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
    connect_started: Notify,
    created: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    last_request: RwLock<Option<ConnectRequest>>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            outcome: RwLock::new(ConnectOutcome::Connected),
            create_error: RwLock::new(None),
            connect_error: RwLock::new(None),
            disconnect_error: RwLock::new(None),
            refresh_error: RwLock::new(None),
            needs_refresh: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            connect_started: Notify::new(),
            created: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_request: RwLock::new(None),
        }
    }
}

/// Factory of scriptable mock sessions.
#[derive(Debug, Clone)]
pub struct MockAdapterFactory {
    info: AdapterInfo,
    script: Arc<MockScript>,
}

impl MockAdapterFactory {
    /// Create a factory whose sessions connect immediately.
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: AdapterInfo::new(code, name),
            script: Arc::new(MockScript::default()),
        }
    }

    /// Set the connect outcome.
    #[must_use]
    pub fn with_outcome(self, outcome: ConnectOutcome) -> Self {
        self.set_outcome(outcome);
        self
    }

    /// Change the connect outcome of subsequent connects.
    pub fn set_outcome(&self, outcome: ConnectOutcome) {
        *self.script.outcome.write() = outcome;
    }

    /// Make session creation fail.
    pub fn fail_create(&self, error: AdapterError) {
        *self.script.create_error.write() = Some(error);
    }

    /// Make connect fail.
    pub fn fail_connect(&self, error: AdapterError) {
        *self.script.connect_error.write() = Some(error);
    }

    /// Make disconnect fail.
    pub fn fail_disconnect(&self, error: AdapterError) {
        *self.script.disconnect_error.write() = Some(error);
    }

    /// Make refresh fail.
    pub fn fail_refresh(&self, error: AdapterError) {
        *self.script.refresh_error.write() = Some(error);
    }

    /// Clear every injected failure.
    pub fn clear_failures(&self) {
        *self.script.create_error.write() = None;
        *self.script.connect_error.write() = None;
        *self.script.disconnect_error.write() = None;
        *self.script.refresh_error.write() = None;
    }

    /// Set what `needs_refresh` reports.
    pub fn set_needs_refresh(&self, needs_refresh: bool) {
        self.script
            .needs_refresh
            .store(needs_refresh, Ordering::SeqCst);
    }

    /// Block connects until released with [`Self::release_connects`].
    pub fn hold_connects(&self) {
        self.script.gated.store(true, Ordering::SeqCst);
    }

    /// Let `n` held connects proceed.
    pub fn release_connects(&self, n: usize) {
        self.script.gate.add_permits(n);
    }

    /// Wait until a connect call has reached the adapter.
    pub async fn wait_for_connect_started(&self) {
        self.script.connect_started.notified().await;
    }

    /// Number of sessions created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.script.created.load(Ordering::SeqCst)
    }

    /// Number of connect calls.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.script.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.script.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of refresh calls.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.script.refresh_calls.load(Ordering::SeqCst)
    }

    /// The last connect request received.
    #[must_use]
    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.script.last_request.read().clone()
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn info(&self) -> AdapterInfo {
        self.info.clone()
    }

    fn create(&self, _config_params: &Params) -> Result<Arc<dyn SystemAdapter>, AdapterError> {
        if let Some(error) = self.script.create_error.read().clone() {
            return Err(error);
        }
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockAdapter {
            info: self.info.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

/// One mock session.
#[derive(Debug)]
pub struct MockAdapter {
    info: AdapterInfo,
    script: Arc<MockScript>,
}

impl MockAdapter {
    fn root(&self, code: &str) -> RootSymbol {
        RootSymbol {
            code: code.to_string(),
            description: format!("{code} futures"),
            exchange: "CME".to_string(),
            currency: "USD".to_string(),
            point_value: Decimal::new(50, 0),
            tick_size: Decimal::new(25, 2),
        }
    }
}

const MOCK_ROOTS: [&str; 3] = ["ES", "NQ", "CL"];

#[async_trait]
impl SystemAdapter for MockAdapter {
    fn info(&self) -> AdapterInfo {
        self.info.clone()
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectOutcome, AdapterError> {
        self.script.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.script.last_request.write() = Some(request.clone());
        self.script.connect_started.notify_one();

        if self.script.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.script.gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(error) = self.script.connect_error.read().clone() {
            return Err(error);
        }
        Ok(self.script.outcome.read().clone())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.script.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.disconnect_error.read().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn needs_refresh(&self) -> bool {
        self.script.needs_refresh.load(Ordering::SeqCst)
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        self.script.refresh_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.refresh_error.read().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_root_symbols(&self, filter: &str) -> Result<Vec<RootSymbol>, AdapterError> {
        Ok(MOCK_ROOTS
            .iter()
            .filter(|code| code.starts_with(filter))
            .map(|code| self.root(code))
            .collect())
    }

    async fn get_root_symbol(&self, root: &str) -> Result<RootSymbol, AdapterError> {
        if MOCK_ROOTS.contains(&root) {
            Ok(self.root(root))
        } else {
            Err(AdapterError::NotFound {
                what: format!("root symbol {root}"),
            })
        }
    }

    async fn get_instruments(&self, root: &str) -> Result<Vec<Instrument>, AdapterError> {
        let root = self.get_root_symbol(root).await?;
        Ok(vec![Instrument {
            symbol: format!("{}Z6", root.code),
            root: root.code.clone(),
            name: format!("{} Dec 2026", root.description),
            expiration_date: NaiveDate::from_ymd_opt(2026, 12, 18),
            continuous: false,
        }])
    }

    async fn get_price_bars(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<PriceBars, AdapterError> {
        let time = date
            .and_hms_opt(14, 30, 0)
            .map(|t| Utc.from_utc_datetime(&t))
            .ok_or_else(|| AdapterError::InvalidParameter {
                name: "date".to_string(),
                message: date.to_string(),
            })?;
        Ok(PriceBars {
            symbol: symbol.to_string(),
            date,
            timezone: "UTC".to_string(),
            bars: vec![PriceBar {
                time,
                open: Decimal::new(5000, 0),
                high: Decimal::new(5010, 0),
                low: Decimal::new(4990, 0),
                close: Decimal::new(5005, 0),
                volume: 1_000,
            }],
        })
    }

    async fn get_accounts(&self) -> Result<Vec<Account>, AdapterError> {
        Ok(vec![Account {
            code: "MOCK-1".to_string(),
            kind: AccountKind::Demo,
            currency: "USD".to_string(),
            cash_balance: Decimal::new(100_000, 0),
        }])
    }

    async fn test_adapter(&self, service: &str, query: &str) -> Result<String, AdapterError> {
        Ok(format!("{service}:{query}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            username: "alice".to_string(),
            connection_code: "main".to_string(),
            host: "broker.local".to_string(),
            config_params: Params::new(),
            connect_params: Params::new(),
        }
    }

    #[tokio::test]
    async fn sessions_share_the_script() {
        let factory = MockAdapterFactory::new("broker-x", "Broker X");
        let a = factory.create(&Params::new()).unwrap();
        let b = factory.create(&Params::new()).unwrap();

        a.connect(&request()).await.unwrap();
        b.disconnect().await.unwrap();

        assert_eq!(factory.created(), 2);
        assert_eq!(factory.connect_calls(), 1);
        assert_eq!(factory.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn create_failure_is_reported() {
        let factory = MockAdapterFactory::new("broker-x", "Broker X");
        factory.fail_create(AdapterError::InvalidParameter {
            name: "endpoint".to_string(),
            message: "missing".to_string(),
        });

        assert!(factory.create(&Params::new()).is_err());
        assert_eq!(factory.created(), 0);

        factory.clear_failures();
        assert!(factory.create(&Params::new()).is_ok());
    }

    #[tokio::test]
    async fn held_connect_waits_for_release() {
        let factory = MockAdapterFactory::new("broker-x", "Broker X");
        factory.hold_connects();
        let adapter = factory.create(&Params::new()).unwrap();

        let pending = tokio::spawn(async move { adapter.connect(&request()).await });
        factory.wait_for_connect_started().await;
        assert!(!pending.is_finished());

        factory.release_connects(1);
        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
    }

    #[tokio::test]
    async fn canned_queries() {
        let factory = MockAdapterFactory::new("broker-x", "Broker X");
        let adapter = factory.create(&Params::new()).unwrap();

        assert_eq!(adapter.get_root_symbols("N").await.unwrap().len(), 1);
        assert_eq!(adapter.get_root_symbols("").await.unwrap().len(), 3);
        assert!(matches!(
            adapter.get_root_symbol("ZZ").await,
            Err(AdapterError::NotFound { .. })
        ));
        assert_eq!(
            adapter.test_adapter("quotes", "ES").await.unwrap(),
            "quotes:ES"
        );
    }
}
