//! Simulated Adapter
//!
//! A self-contained paper trading system. It needs no upstream service and
//! produces deterministic market data, which makes it the default adapter of
//! local deployments.
//!
//! # Configuration parameters
//!
//! | Name | Default | Meaning |
//! |------|---------|---------|
//! | `login_mode` | `direct` | `direct`, `redirect` or `proxy` |
//! | `auth_url` | built from the request | login page for `redirect` |
//! | `token_ttl_secs` | 3600 | lifetime of the session token |
//! | `refresh_window_secs` | 300 | refresh once expiry is this close |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, TimeZone, Utc, Weekday};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::adapter::{
    AdapterError, AdapterFactory, AdapterInfo, ConnectOutcome, ConnectRequest, SystemAdapter,
    param_str, param_u64,
};
use crate::domain::connection::Params;
use crate::domain::market::{
    Account, AccountKind, Instrument, PriceBar, PriceBars, RootSymbol,
};

/// System code of the simulated adapter.
pub const SIMULATED_SYSTEM_CODE: &str = "SIMULATED";

const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
const DEFAULT_REFRESH_WINDOW_SECS: u64 = 300;
/// Longest token lifetime a session accepts: one year.
const MAX_TOKEN_TTL_SECS: u64 = 366 * 24 * 3600;

/// One-time code the simulated system always refuses.
pub const REFUSED_OTP: &str = "000000";

/// How the simulated system wants users to log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// Connect immediately.
    Direct,
    /// Send the user to the system's own login page.
    Redirect,
    /// Send the user to the broker-hosted login page.
    Proxy,
}

impl LoginMode {
    fn parse(value: Option<&str>) -> Result<Self, AdapterError> {
        match value {
            None | Some("direct") => Ok(Self::Direct),
            Some("redirect") => Ok(Self::Redirect),
            Some("proxy") => Ok(Self::Proxy),
            Some(other) => Err(AdapterError::InvalidParameter {
                name: "login_mode".to_string(),
                message: format!("unknown mode '{other}'"),
            }),
        }
    }
}

/// Validated static configuration of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedConfig {
    /// Login mode.
    pub login_mode: LoginMode,
    /// Login page for `redirect`.
    pub auth_url: Option<String>,
    /// Session token lifetime.
    pub token_ttl: Duration,
    /// How close to expiry a refresh becomes due.
    pub refresh_window: Duration,
}

impl SimulatedConfig {
    /// Read the configuration bag.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown login mode, a malformed
    /// duration, a token lifetime above one year, or a refresh window not
    /// shorter than the token lifetime.
    pub fn from_params(params: &Params) -> Result<Self, AdapterError> {
        let login_mode = LoginMode::parse(param_str(params, "login_mode"))?;
        let ttl = param_u64(params, "token_ttl_secs")?.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let window =
            param_u64(params, "refresh_window_secs")?.unwrap_or(DEFAULT_REFRESH_WINDOW_SECS);

        if ttl > MAX_TOKEN_TTL_SECS {
            return Err(AdapterError::InvalidParameter {
                name: "token_ttl_secs".to_string(),
                message: format!("must not exceed {MAX_TOKEN_TTL_SECS}"),
            });
        }
        if window >= ttl {
            return Err(AdapterError::InvalidParameter {
                name: "refresh_window_secs".to_string(),
                message: format!("must be shorter than token_ttl_secs ({ttl})"),
            });
        }

        Ok(Self {
            login_mode,
            auth_url: param_str(params, "auth_url").map(str::to_string),
            token_ttl: seconds(ttl)?,
            refresh_window: seconds(window)?,
        })
    }
}

fn seconds(secs: u64) -> Result<Duration, AdapterError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| AdapterError::InvalidParameter {
            name: "duration".to_string(),
            message: format!("{secs} seconds is out of range"),
        })
}

/// Factory of simulated sessions.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAdapterFactory;

impl SimulatedAdapterFactory {
    /// Create the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AdapterFactory for SimulatedAdapterFactory {
    fn info(&self) -> AdapterInfo {
        simulated_info()
    }

    fn create(&self, config_params: &Params) -> Result<Arc<dyn SystemAdapter>, AdapterError> {
        let config = SimulatedConfig::from_params(config_params)?;
        Ok(Arc::new(SimulatedAdapter::new(config)))
    }
}

fn simulated_info() -> AdapterInfo {
    AdapterInfo::new(SIMULATED_SYSTEM_CODE, "Simulated Exchange")
}

#[derive(Debug, Clone)]
struct Session {
    username: String,
    token_expires_at: DateTime<Utc>,
}

/// One simulated session.
#[derive(Debug)]
pub struct SimulatedAdapter {
    config: SimulatedConfig,
    session: RwLock<Option<Session>>,
}

impl SimulatedAdapter {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    /// Expiry of the current token.
    #[must_use]
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().as_ref().map(|s| s.token_expires_at)
    }

    fn token_expiry(&self) -> Result<DateTime<Utc>, AdapterError> {
        Utc::now()
            .checked_add_signed(self.config.token_ttl)
            .ok_or_else(|| AdapterError::InvalidParameter {
                name: "token_ttl_secs".to_string(),
                message: "token expiry is out of range".to_string(),
            })
    }

    fn session(&self) -> Result<Session, AdapterError> {
        self.session.read().clone().ok_or(AdapterError::NotConnected)
    }

    fn root(&self, code: &str) -> Option<RootSymbol> {
        ROOTS
            .iter()
            .find(|r| r.code == code)
            .map(SimulatedRoot::to_root_symbol)
    }
}

struct SimulatedRoot {
    code: &'static str,
    description: &'static str,
    exchange: &'static str,
    point_value: i64,
    tick_size: (i64, u32),
    base_price: i64,
}

impl SimulatedRoot {
    fn to_root_symbol(&self) -> RootSymbol {
        RootSymbol {
            code: self.code.to_string(),
            description: self.description.to_string(),
            exchange: self.exchange.to_string(),
            currency: "USD".to_string(),
            point_value: Decimal::new(self.point_value, 0),
            tick_size: Decimal::new(self.tick_size.0, self.tick_size.1),
        }
    }
}

const ROOTS: [SimulatedRoot; 5] = [
    SimulatedRoot {
        code: "CL",
        description: "Crude Oil",
        exchange: "NYMEX",
        point_value: 1000,
        tick_size: (1, 2),
        base_price: 75,
    },
    SimulatedRoot {
        code: "ES",
        description: "E-mini S&P 500",
        exchange: "CME",
        point_value: 50,
        tick_size: (25, 2),
        base_price: 5000,
    },
    SimulatedRoot {
        code: "GC",
        description: "Gold",
        exchange: "COMEX",
        point_value: 100,
        tick_size: (1, 1),
        base_price: 2400,
    },
    SimulatedRoot {
        code: "NQ",
        description: "E-mini Nasdaq-100",
        exchange: "CME",
        point_value: 20,
        tick_size: (25, 2),
        base_price: 18000,
    },
    SimulatedRoot {
        code: "YM",
        description: "E-mini Dow",
        exchange: "CBOT",
        point_value: 5,
        tick_size: (1, 0),
        base_price: 39000,
    },
];

/// Quarterly contract months and their codes.
const QUARTERLY: [(u32, char); 4] = [(3, 'H'), (6, 'M'), (9, 'U'), (12, 'Z')];

/// Bars per session, one per hour from the open.
const BARS_PER_DAY: u32 = 7;
const SESSION_OPEN_HOUR_UTC: u32 = 14;

fn third_friday(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Fri, 3)
}

/// Deterministic per-symbol, per-date offset.
fn drift(symbol: &str, date: NaiveDate) -> i64 {
    let seed = symbol
        .bytes()
        .fold(i64::from(date.num_days_from_ce()), |acc, b| {
            acc.wrapping_mul(31).wrapping_add(i64::from(b))
        });
    seed.rem_euclid(41) - 20
}

#[async_trait]
impl SystemAdapter for SimulatedAdapter {
    fn info(&self) -> AdapterInfo {
        simulated_info()
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectOutcome, AdapterError> {
        if param_str(&request.connect_params, "otp") == Some(REFUSED_OTP) {
            return Err(AdapterError::ConnectionRejected {
                message: "one-time code refused".to_string(),
            });
        }

        let token_expires_at = self.token_expiry()?;
        *self.session.write() = Some(Session {
            username: request.username.clone(),
            token_expires_at,
        });

        Ok(match self.config.login_mode {
            LoginMode::Direct => ConnectOutcome::Connected,
            LoginMode::Redirect => {
                let url = self.config.auth_url.clone().unwrap_or_else(|| {
                    format!(
                        "https://{}/simulated/login?user={}&connection={}",
                        request.host, request.username, request.connection_code
                    )
                });
                ConnectOutcome::RedirectTo(url)
            }
            LoginMode::Proxy => ConnectOutcome::ProxyLogin,
        })
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        match self.session.write().take() {
            Some(_) => Ok(()),
            None => Err(AdapterError::NotConnected),
        }
    }

    fn needs_refresh(&self) -> bool {
        self.token_expires_at()
            .is_some_and(|expires_at| expires_at - Utc::now() <= self.config.refresh_window)
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        let mut session = self.session.write();
        let session = session.as_mut().ok_or(AdapterError::NotConnected)?;
        session.token_expires_at = self.token_expiry()?;
        Ok(())
    }

    async fn get_root_symbols(&self, filter: &str) -> Result<Vec<RootSymbol>, AdapterError> {
        let filter = filter.to_uppercase();
        Ok(ROOTS
            .iter()
            .filter(|r| r.code.starts_with(&filter))
            .map(SimulatedRoot::to_root_symbol)
            .collect())
    }

    async fn get_root_symbol(&self, root: &str) -> Result<RootSymbol, AdapterError> {
        self.root(root).ok_or_else(|| AdapterError::NotFound {
            what: format!("root symbol {root}"),
        })
    }

    async fn get_instruments(&self, root: &str) -> Result<Vec<Instrument>, AdapterError> {
        let root = self.get_root_symbol(root).await?;
        let year = Utc::now().year();

        let mut instruments = vec![Instrument {
            symbol: format!("{}1!", root.code),
            root: root.code.clone(),
            name: format!("{} continuous", root.description),
            expiration_date: None,
            continuous: true,
        }];
        instruments.extend(QUARTERLY.iter().map(|&(month, letter)| Instrument {
            symbol: format!("{}{letter}{}", root.code, year.rem_euclid(10)),
            root: root.code.clone(),
            name: format!("{} {year}-{month:02}", root.description),
            expiration_date: third_friday(year, month),
            continuous: false,
        }));
        Ok(instruments)
    }

    async fn get_price_bars(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<PriceBars, AdapterError> {
        let root = ROOTS
            .iter()
            .find(|r| symbol.starts_with(r.code))
            .ok_or_else(|| AdapterError::NotFound {
                what: format!("symbol {symbol}"),
            })?;

        let mut bars = Vec::new();
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let mut price = root.base_price + drift(symbol, date);
            for hour in 0..BARS_PER_DAY {
                let Some(time) = date.and_hms_opt(SESSION_OPEN_HOUR_UTC + hour, 0, 0) else {
                    continue;
                };
                let Some(next) = date.checked_add_days(Days::new(u64::from(hour) + 1)) else {
                    break;
                };
                let step = drift(symbol, next) / 4;
                let open = price;
                let close = price + step;
                bars.push(PriceBar {
                    time: Utc.from_utc_datetime(&time),
                    open: Decimal::from(open),
                    high: Decimal::from(open.max(close) + 1),
                    low: Decimal::from(open.min(close) - 1),
                    close: Decimal::from(close),
                    volume: 1_000 + u64::from(hour) * 250,
                });
                price = close;
            }
        }

        Ok(PriceBars {
            symbol: symbol.to_string(),
            date,
            timezone: "UTC".to_string(),
            bars,
        })
    }

    async fn get_accounts(&self) -> Result<Vec<Account>, AdapterError> {
        let session = self.session()?;
        Ok(vec![Account {
            code: format!("SIM-{}", session.username),
            kind: AccountKind::Demo,
            currency: "USD".to_string(),
            cash_balance: Decimal::new(100_000, 0),
        }])
    }

    async fn test_adapter(&self, service: &str, query: &str) -> Result<String, AdapterError> {
        match service {
            "echo" => Ok(query.to_string()),
            "session" => {
                let session = self.session()?;
                Ok(format!(
                    "user={} expires_at={}",
                    session.username,
                    session.token_expires_at.to_rfc3339()
                ))
            }
            other => Err(AdapterError::Unsupported {
                operation: format!("test service '{other}'"),
            }),
        }
    }
}
