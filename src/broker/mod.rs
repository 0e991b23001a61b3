//! Broker integrations for the MERVAL strategy.
//!
//! ## Alpaca
//! REST and WebSocket connectivity for:
//! - Historical hourly bars and latest quotes
//! - Positions and market orders
//! - Real-time quote stream
//!
//! ## Paper
//! In-memory account that fills at marked prices, used for paper trading
//! and tests.

mod client;
mod error;
pub mod fees;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::AlpacaClient;
pub use error::BrokerError;
pub use fees::FeeSchedule;
pub use mock::{AccountSnapshot, PaperBroker};
pub use traits::{Brokerage, MarketDataProvider, PriceFeed};
#[cfg(test)]
pub use traits::{MockBrokerage, MockMarketDataProvider, MockPriceFeed};
pub use types::*;
pub use websocket::AlpacaQuoteStream;
