//! Collaborator interfaces the strategy core depends on.
//!
//! Three seams, each implemented by the Alpaca backend and by the
//! paper broker:
//! - historical bars and latest quotes
//! - position lookup and order submission
//! - the real-time price feed

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use super::error::BrokerError;
use super::types::{FeedEvent, MarketOrder, OrderAck, Position, PriceSeries, Quote};

/// Historical bars and top-of-book quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Hourly bars covering the last `lookback_days` calendar days.
    async fn get_bars(&self, symbol: &str, lookback_days: u32)
        -> Result<PriceSeries, BrokerError>;

    /// Latest bid/ask.
    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;
}

/// Account state and order entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Open position for `symbol`, `None` when flat.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    /// Submit a market order.
    async fn submit_order(&self, order: &MarketOrder) -> Result<OrderAck, BrokerError>;

    /// Latest traded/quoted price seen by the strategy.
    ///
    /// Live brokers mark positions themselves; simulated ones use this
    /// to value positions and fill orders.
    async fn mark_price(&self, _symbol: &str, _price: Decimal) {}
}

/// Asynchronous push feed of `(symbol, price)` ticks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Start streaming `symbols`. Events arrive on the returned channel
    /// until the feed disconnects or is closed.
    async fn subscribe(&self, symbols: Vec<String>)
        -> Result<mpsc::Receiver<FeedEvent>, BrokerError>;

    /// Release the connection.
    async fn close(&self);
}
