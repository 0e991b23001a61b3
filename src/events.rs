//! Structured strategy events.
//!
//! Every exit, rebalance and sleeve selection is published to an
//! [`EventSink`] as `{event, symbol, reason?, qty?, price?, timestamp}`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::OrderSide;
use crate::risk::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Exit,
    Rebalance,
    Select,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Exit => "exit",
            EventKind::Rebalance => "rebalance",
            EventKind::Select => "select",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEvent {
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl StrategyEvent {
    pub fn exit(symbol: &str, reason: ExitReason, qty: Decimal, price: Decimal) -> Self {
        Self {
            kind: EventKind::Exit,
            symbol: symbol.to_string(),
            reason: Some(reason.to_string()),
            qty: Some(qty),
            price: Some(price),
            timestamp: Utc::now(),
        }
    }

    pub fn rebalance(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> Self {
        Self {
            kind: EventKind::Rebalance,
            symbol: symbol.to_string(),
            reason: Some(side.to_string()),
            qty: Some(qty),
            price: Some(price),
            timestamp: Utc::now(),
        }
    }

    /// A symbol entering the trading sleeve; `reason` carries its sector.
    pub fn select(symbol: &str, sector: &str) -> Self {
        Self {
            kind: EventKind::Select,
            symbol: symbol.to_string(),
            reason: Some(sector.to_string()),
            qty: None,
            price: None,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for strategy events. Implementations must not block for
/// long; they are called from tick evaluation tasks.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StrategyEvent);
}

/// Publishes events as JSON on the `strategy_event` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &StrategyEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(
            target: "strategy_event",
            event = event.kind.as_str(),
            symbol = %event.symbol,
            %payload,
            "Strategy event"
        );
    }
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingEventSink {
    events: std::sync::Mutex<Vec<StrategyEvent>>,
}

#[cfg(test)]
impl RecordingEventSink {
    pub(crate) fn events(&self) -> Vec<StrategyEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl EventSink for RecordingEventSink {
    fn emit(&self, event: &StrategyEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exit_event_shape() {
        let event = StrategyEvent::exit("YPF", ExitReason::StopLoss, dec!(40), dec!(84.5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "exit");
        assert_eq!(json["symbol"], "YPF");
        assert_eq!(json["reason"], "stop_loss");
        assert_eq!(json["qty"], "40");
        assert_eq!(json["price"], "84.5");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_select_event_omits_order_fields() {
        let event = StrategyEvent::select("GLOB", "technology");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "select");
        assert!(json.get("qty").is_none());
        assert!(json.get("price").is_none());

        let back: StrategyEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_sink_receives_events() {
        let mut sink = MockEventSink::new();
        sink.expect_emit()
            .withf(|e| e.kind == EventKind::Rebalance && e.reason.as_deref() == Some("buy"))
            .times(1)
            .return_const(());
        sink.emit(&StrategyEvent::rebalance("PAM", OrderSide::Buy, dec!(5), dec!(60)));
    }
}
