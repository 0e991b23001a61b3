//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Periodic candidate selection for the trading sleeve
//! - Order submission for exits and rebalances
//! - The per-tick evaluation loop

mod engine;
mod executor;
mod selector;

pub use engine::{Evaluation, TradingEngine};
pub use executor::OrderExecutor;
pub use selector::{CandidateSelector, ScoredCandidate, Selection};

use thiserror::Error;

use crate::analysis::SignalError;
use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    /// The feed ended; in-flight work was drained before returning.
    #[error("price stream disconnected: {0}")]
    StreamDisconnected(String),
}
