//! Market data, account and order types shared by every broker backend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::decimal::to_f64;

/// One hourly bar. Only the fields the strategy reads are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Chronologically ordered bars for a single symbol.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub symbol: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, sorting bars by timestamp.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Closing prices as `f64` for the statistics layer.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| to_f64(b.close)).collect()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.bars.last().map(|b| b.close)
    }

    pub fn mean_close(&self) -> Option<Decimal> {
        mean(self.bars.iter().map(|b| b.close), self.bars.len())
    }

    pub fn mean_volume(&self) -> Option<Decimal> {
        mean(self.bars.iter().map(|b| b.volume), self.bars.len())
    }

    /// Bars at or after `cutoff`.
    pub fn since(&self, cutoff: DateTime<Utc>) -> PriceSeries {
        PriceSeries {
            symbol: self.symbol.clone(),
            bars: self
                .bars
                .iter()
                .filter(|b| b.timestamp >= cutoff)
                .cloned()
                .collect(),
        }
    }
}

fn mean(values: impl Iterator<Item = Decimal>, len: usize) -> Option<Decimal> {
    if len == 0 {
        return None;
    }
    Some(values.sum::<Decimal>() / Decimal::from(len))
}

/// Best bid/ask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    /// Relative spread `(ask - bid) / ask`; `None` when the ask is not positive.
    pub fn spread(&self) -> Option<Decimal> {
        if self.ask <= Decimal::ZERO {
            return None;
        }
        Some((self.ask - self.bid) / self.ask)
    }
}

/// Brokerage position. Quantity is signed, zero means flat.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Return since entry; `None` without a usable entry price.
    pub fn unrealized_return(&self) -> Option<Decimal> {
        if self.avg_entry_price <= Decimal::ZERO {
            return None;
        }
        Some((self.current_price - self.avg_entry_price) / self.avg_entry_price)
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PendingNew,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    #[serde(other)]
    Other,
}

/// Market order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOrder {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

impl MarketOrder {
    /// Market order valid for the trading day.
    pub fn day(symbol: impl Into<String>, qty: Decimal, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
        }
    }
}

/// Acknowledgement for a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub status: OrderStatus,
    pub filled_avg_price: Option<Decimal>,
}

/// A price update from the real-time feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Events delivered by a [`PriceFeed`](super::PriceFeed).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    /// Connection established and subscription acknowledged
    Connected,
    /// Connection lost; carries the reason
    Disconnected(String),
}

// ==================== Alpaca wire types ====================

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaBarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
}

impl From<AlpacaBar> for Bar {
    fn from(bar: AlpacaBar) -> Self {
        Bar {
            timestamp: bar.timestamp,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaLatestQuote {
    pub quote: AlpacaQuote,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaQuote {
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default)]
    pub qty: Option<Decimal>,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlpacaErrorBody {
    #[serde(default)]
    pub message: String,
}

/// Messages on the market data stream, tagged by `T`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
pub(crate) enum AlpacaStreamMessage {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error { code: i64, msg: String },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        quotes: Vec<String>,
    },
    #[serde(rename = "q")]
    Quote {
        #[serde(rename = "S")]
        symbol: String,
        #[serde(rename = "bp")]
        bid_price: Decimal,
        #[serde(rename = "ap")]
        ask_price: Decimal,
        #[serde(rename = "t")]
        timestamp: DateTime<Utc>,
    },
    #[serde(other)]
    Other,
}
