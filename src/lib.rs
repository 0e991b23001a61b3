//! # Merval Trader
//!
//! Momentum / mean-reversion equities strategy for Argentine ADRs traded
//! through Alpaca.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: Market data, brokerage and price-feed interfaces with the
//!   Alpaca and paper implementations
//! - `analysis`: Hurst exponent, momentum, mean reversion and the blended signal
//! - `portfolio`: Core holdings, candidate universe and the trading sleeve
//! - `risk`: Position sizing, stop-loss / take-profit and rebalancing
//! - `strategy`: Candidate selection, order execution and the tick loop
//! - `events`: Structured strategy events
//! - `metrics`: Realized performance tracking
//! - `persistence`: SQLite journal and paper account state
//! - `utils`: Shared utilities and decimal arithmetic

pub mod analysis;
pub mod broker;
pub mod config;
pub mod events;
pub mod metrics;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
