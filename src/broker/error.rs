//! Errors raised by market data, brokerage and streaming collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Bars or quotes could not be fetched, or came back empty.
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// The broker refused an order.
    #[error("order for {symbol} rejected: {reason}")]
    OrderRejected { symbol: String, reason: String },

    /// The real-time feed dropped.
    #[error("price stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BrokerError {
    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        BrokerError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rejected(symbol: &str, reason: impl Into<String>) -> Self {
        BrokerError::OrderRejected {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}
