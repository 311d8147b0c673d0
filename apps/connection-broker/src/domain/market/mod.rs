//! Market Data and Account Types
//!
//! Values returned by adapters for market-data and account queries. The
//! broker passes them through untouched; they are serializable so the
//! transport layer can hand them straight to clients.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A root symbol (e.g. a futures root like `ES`) offered by a system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSymbol {
    /// Root code as used by the external system.
    pub code: String,
    /// Human-readable description.
    pub description: String,
    /// Exchange the root is traded on.
    pub exchange: String,
    /// Currency of prices.
    pub currency: String,
    /// Value of one full point move.
    pub point_value: Decimal,
    /// Minimum price increment.
    pub tick_size: Decimal,
}

/// A tradable instrument belonging to a root symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument symbol (e.g. `ESZ6`).
    pub symbol: String,
    /// Root the instrument belongs to.
    pub root: String,
    /// Human-readable name.
    pub name: String,
    /// Expiration date, if the instrument expires.
    pub expiration_date: Option<NaiveDate>,
    /// Whether this is a continuous contract.
    pub continuous: bool,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar open time.
    pub time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: u64,
}

/// Intraday bars of one symbol for one trading date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBars {
    /// Instrument symbol.
    pub symbol: String,
    /// Trading date the bars belong to.
    pub date: NaiveDate,
    /// Timezone of the exchange session.
    pub timezone: String,
    /// Bars in time order.
    pub bars: Vec<PriceBar>,
}

/// Kind of trading account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Simulated money.
    Demo,
    /// Real money.
    Live,
}

/// A trading account reachable through a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account code at the external system.
    pub code: String,
    /// Demo or live.
    pub kind: AccountKind,
    /// Account currency.
    pub currency: String,
    /// Cash balance.
    pub cash_balance: Decimal,
}
