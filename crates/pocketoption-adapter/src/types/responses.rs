/*
[INPUT]:  Venue wire schema and serde requirements
[OUTPUT]: Typed Rust response structs with serialization support
[POS]:    Data layer - type definitions for venue communication
[UPDATE]: When the wire schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::AccountMode;
use crate::error::{PocketOptionError, Result};

/// Order/deal identifier; the venue mixes numeric and string ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderId {
    Num(u64),
    Text(String),
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderId::Num(n) => write!(f, "{n}"),
            OrderId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for OrderId {
    fn from(n: u64) -> Self {
        OrderId::Num(n)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId::Text(s.to_string())
    }
}

/// Balance push, sniffed out of the binary frames by the codec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    #[serde(rename = "isDemo", default)]
    pub is_demo: u8,
    #[serde(default)]
    pub uid: Option<u64>,
}

impl BalanceUpdate {
    /// Account mode carried by this update
    pub fn mode(&self) -> AccountMode {
        AccountMode::from_is_demo(self.is_demo)
    }
}

/// Reply to an `openOrder` request, correlated by `requestId`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedOrder {
    #[serde(default)]
    pub id: Option<OrderId>,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(rename = "openTimestamp", default)]
    pub open_timestamp: Option<f64>,
    #[serde(rename = "closeTimestamp", default)]
    pub close_timestamp: Option<f64>,
}

impl OpenedOrder {
    /// Parse a fulfilled reply payload
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A settled deal reported by the venue when a position closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: OrderId,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub profit: Option<Decimal>,
    #[serde(rename = "openTimestamp", default)]
    pub open_timestamp: Option<f64>,
    #[serde(rename = "closeTimestamp", default)]
    pub close_timestamp: Option<f64>,
}

impl Deal {
    /// Whether the deal closed in profit
    pub fn is_win(&self) -> bool {
        self.profit.is_some_and(|p| p > Decimal::ZERO)
    }
}

/// Second frame of the close-order signal: the settled deal batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDealsPayload {
    #[serde(default)]
    pub deals: Vec<Deal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub profit: Option<Decimal>,
}

/// One quote tick from the `updateStream` feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTick {
    pub asset: String,
    /// Server timestamp, seconds since epoch (fractional)
    pub timestamp: f64,
    pub price: f64,
}

impl StreamTick {
    /// Parse one `[asset, timestamp, price, ...]` row of a stream batch
    pub fn from_row(row: &Value) -> Option<Self> {
        let cells = row.as_array()?;
        Some(Self {
            asset: cells.first()?.as_str()?.to_string(),
            timestamp: cells.get(1)?.as_f64()?,
            price: cells.get(2)?.as_f64()?,
        })
    }
}

/// One raw point of a history batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: f64,
    pub price: f64,
}

/// Reply to a `loadHistoryPeriod` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBatch {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub data: Vec<HistoryPoint>,
}

impl HistoryBatch {
    /// Parse a fulfilled reply payload
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Points ordered oldest first (the venue replies newest first)
    pub fn sorted_points(&self) -> Vec<HistoryPoint> {
        let mut points = self.data.clone();
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        points
    }
}

/// Initial history snapshot pushed after a `changeSymbol` subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryNew {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub period: Option<u32>,
    /// `[timestamp, price]` pairs
    #[serde(default)]
    pub history: Vec<(f64, f64)>,
}

/// Snapshot of the venue's payout table.
///
/// The wire carries rows of heterogeneous arrays
/// (`[5, "#AAPL", "Apple", "stock", 2, 50, ...]`); only the positions used
/// here are known: index 1 is the asset symbol, index 5 the payout percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutTable {
    rows: Vec<Value>,
}

impl PayoutTable {
    /// Parse a raw payout-table message
    pub fn parse(raw: &str) -> Result<Self> {
        let rows: Vec<Value> = serde_json::from_str(raw)?;
        Ok(Self { rows })
    }

    /// Payout percent for an asset symbol, if listed
    pub fn payout(&self, asset: &str) -> Option<i64> {
        self.rows
            .iter()
            .find(|row| row.get(1).and_then(Value::as_str) == Some(asset))
            .and_then(|row| row.get(5))
            .and_then(Value::as_i64)
    }

    /// All listed asset symbols
    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|row| row.get(1).and_then(Value::as_str))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Extract the venue's `error` field from a reply payload, if present
pub(crate) fn reply_error(payload: &Value) -> Option<PocketOptionError> {
    let error = payload.get("error")?;
    let message = error
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(PocketOptionError::Rejected(message))
}
