//! Order submission for exits and rebalances.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::{BrokerError, Brokerage, MarketOrder, OrderAck, OrderSide, Position};
use crate::events::{EventSink, StrategyEvent};
use crate::risk::{ExitReason, RebalanceOrder};

/// Submits market orders and publishes the matching strategy events.
pub struct OrderExecutor {
    broker: Arc<dyn Brokerage>,
    events: Arc<dyn EventSink>,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Brokerage>, events: Arc<dyn EventSink>) -> Self {
        Self { broker, events }
    }

    /// Liquidate the whole of `position`.
    pub async fn exit(
        &self,
        position: &Position,
        reason: ExitReason,
    ) -> Result<OrderAck, BrokerError> {
        let symbol = &position.symbol;
        info!(
            %symbol,
            %reason,
            qty = %position.quantity,
            entry = %position.avg_entry_price,
            price = %position.current_price,
            "Exiting position"
        );

        let order = MarketOrder::day(symbol.as_str(), position.quantity, OrderSide::Sell);
        let ack = self.submit(&order).await?;
        let price = ack.filled_avg_price.unwrap_or(position.current_price);

        self.events
            .emit(&StrategyEvent::exit(symbol, reason, position.quantity, price));
        Ok(ack)
    }

    /// Move the position in `symbol` by `order`.
    pub async fn rebalance(
        &self,
        symbol: &str,
        order: &RebalanceOrder,
        price: Decimal,
    ) -> Result<OrderAck, BrokerError> {
        info!(
            %symbol,
            side = %order.side,
            qty = %order.quantity,
            target = %order.target,
            %price,
            "Rebalancing position"
        );

        let market = MarketOrder::day(symbol, order.quantity, order.side);
        let ack = self.submit(&market).await?;
        let fill = ack.filled_avg_price.unwrap_or(price);

        self.events
            .emit(&StrategyEvent::rebalance(symbol, order.side, order.quantity, fill));
        Ok(ack)
    }

    async fn submit(&self, order: &MarketOrder) -> Result<OrderAck, BrokerError> {
        match self.broker.submit_order(order).await {
            Ok(ack) => {
                info!(
                    symbol = %ack.symbol,
                    order_id = %ack.id,
                    side = %ack.side,
                    qty = %ack.qty,
                    status = ?ack.status,
                    fill = ?ack.filled_avg_price,
                    "Order accepted"
                );
                Ok(ack)
            }
            Err(e) => {
                error!(
                    symbol = %order.symbol,
                    side = %order.side,
                    qty = %order.qty,
                    error = %e,
                    "Order failed, position left unchanged"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockBrokerage, OrderStatus};
    use crate::events::{EventKind, RecordingEventSink};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn position() -> Position {
        Position {
            symbol: "YPF".to_string(),
            quantity: dec!(40),
            avg_entry_price: dec!(100),
            current_price: dec!(84),
        }
    }

    fn ack(order: &MarketOrder, fill: Decimal) -> OrderAck {
        OrderAck {
            id: "order-1".to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            status: OrderStatus::Filled,
            filled_avg_price: Some(fill),
        }
    }

    #[tokio::test]
    async fn test_exit_sells_full_quantity() {
        let mut broker = MockBrokerage::new();
        broker
            .expect_submit_order()
            .withf(|o| o.side == OrderSide::Sell && o.qty == dec!(40) && o.symbol == "YPF")
            .times(1)
            .returning(|o| Ok(ack(o, dec!(83.9))));
        let sink = Arc::new(RecordingEventSink::default());
        let executor = OrderExecutor::new(Arc::new(broker), sink.clone());

        let ack = assert_ok!(executor.exit(&position(), ExitReason::StopLoss).await);
        assert_eq!(ack.qty, dec!(40));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Exit);
        assert_eq!(events[0].reason.as_deref(), Some("stop_loss"));
        assert_eq!(events[0].price, Some(dec!(83.9)));
    }

    #[tokio::test]
    async fn test_rejected_order_emits_nothing() {
        let mut broker = MockBrokerage::new();
        broker
            .expect_submit_order()
            .returning(|o| Err(BrokerError::rejected(&o.symbol, "insufficient buying power")));
        let sink = Arc::new(RecordingEventSink::default());
        let executor = OrderExecutor::new(Arc::new(broker), sink.clone());

        let order = RebalanceOrder {
            side: OrderSide::Buy,
            quantity: dec!(50),
            target: dec!(50),
        };
        let err = assert_err!(executor.rebalance("PAM", &order, dec!(60)).await);
        assert!(matches!(err, BrokerError::OrderRejected { .. }));
        assert!(sink.events().is_empty());
    }
}
