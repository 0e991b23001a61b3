//! Paper broker for simulated trading and tests.
//!
//! Holds cash and long positions in memory, fills market orders at the
//! latest marked price and charges regulatory sell fees. Market data and the
//! price feed are served from whatever the caller loads in.

use super::error::BrokerError;
use super::fees::FeeSchedule;
use super::traits::{Brokerage, MarketDataProvider, PriceFeed};
use super::types::*;
use crate::persistence::{PersistedPosition, PersistedState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Simulated long position.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Simulated account.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    pub initial_balance: Decimal,
    pub cash: Decimal,
    pub positions: HashMap<String, PaperPosition>,
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,
    pub order_count: u64,
}

impl PaperAccount {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            cash: initial_balance,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            order_count: 0,
        }
    }
}

/// Account valuation at the latest marks.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub market_value: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,
    pub position_count: usize,
    pub order_count: u64,
}

/// In-memory broker implementing every collaborator interface.
pub struct PaperBroker {
    account: RwLock<PaperAccount>,
    order_id_counter: AtomicU64,
    fees: FeeSchedule,
    /// Latest marked price per symbol
    prices: RwLock<HashMap<String, Decimal>>,
    bars: RwLock<HashMap<String, PriceSeries>>,
    quotes: RwLock<HashMap<String, Quote>>,
    feed: Mutex<Option<mpsc::Sender<FeedEvent>>>,
}

impl PaperBroker {
    /// Create a paper broker with `initial_balance` in cash.
    pub fn new(initial_balance: Decimal) -> Self {
        Self::with_fees(initial_balance, FeeSchedule::default())
    }

    pub fn with_fees(initial_balance: Decimal, fees: FeeSchedule) -> Self {
        Self {
            account: RwLock::new(PaperAccount::new(initial_balance)),
            order_id_counter: AtomicU64::new(1),
            fees,
            prices: RwLock::new(HashMap::new()),
            bars: RwLock::new(HashMap::new()),
            quotes: RwLock::new(HashMap::new()),
            feed: Mutex::new(None),
        }
    }

    /// Load historical bars served by `get_bars`.
    pub async fn set_bars(&self, series: PriceSeries) {
        self.bars.write().await.insert(series.symbol.clone(), series);
    }

    /// Load the quote served by `get_latest_quote`.
    pub async fn set_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.write().await.insert(symbol.to_string(), quote);
    }

    /// Push a tick to the subscriber, marking the price first. Returns
    /// `false` when nobody is subscribed.
    pub async fn push_tick(&self, symbol: &str, price: Decimal) -> bool {
        self.set_price(symbol, price).await;
        let sender = self.feed.lock().await.clone();
        match sender {
            Some(tx) => tx
                .send(FeedEvent::Tick(Tick {
                    symbol: symbol.to_string(),
                    price,
                    timestamp: Utc::now(),
                }))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulate a dropped connection.
    pub async fn disconnect(&self, reason: &str) {
        if let Some(tx) = self.feed.lock().await.take() {
            let _ = tx.send(FeedEvent::Disconnected(reason.to_string())).await;
        }
    }

    async fn set_price(&self, symbol: &str, price: Decimal) {
        if price > Decimal::ZERO {
            self.prices.write().await.insert(symbol.to_string(), price);
        }
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Copy of the account.
    pub async fn account(&self) -> PaperAccount {
        self.account.read().await.clone()
    }

    /// Value the account at the latest marks.
    pub async fn snapshot(&self) -> AccountSnapshot {
        let account = self.account.read().await;
        let prices = self.prices.read().await;

        let (market_value, cost_basis) = account.positions.values().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(value, cost), pos| {
                let mark = prices
                    .get(&pos.symbol)
                    .copied()
                    .unwrap_or(pos.avg_entry_price);
                (
                    value + pos.quantity * mark,
                    cost + pos.quantity * pos.avg_entry_price,
                )
            },
        );

        AccountSnapshot {
            cash: account.cash,
            market_value,
            equity: account.cash + market_value,
            unrealized_pnl: market_value - cost_basis,
            realized_pnl: account.realized_pnl,
            total_fees: account.total_fees,
            position_count: account.positions.len(),
            order_count: account.order_count,
        }
    }

    /// Export current state for persistence.
    pub async fn export_state(&self) -> PersistedState {
        let account = self.account.read().await;
        let prices = self.prices.read().await;

        let positions = account
            .positions
            .iter()
            .map(|(symbol, pos)| {
                (
                    symbol.clone(),
                    PersistedPosition {
                        symbol: symbol.clone(),
                        quantity: pos.quantity,
                        avg_entry_price: pos.avg_entry_price,
                        last_price: prices
                            .get(symbol)
                            .copied()
                            .unwrap_or(pos.avg_entry_price),
                        opened_at: pos.opened_at,
                    },
                )
            })
            .collect();

        PersistedState {
            initial_balance: account.initial_balance,
            cash: account.cash,
            realized_pnl: account.realized_pnl,
            total_fees: account.total_fees,
            order_count: account.order_count,
            positions,
            last_saved: Utc::now(),
        }
    }

    /// Restore state from persistence. Last prices become the marks until
    /// fresh ticks arrive.
    pub async fn restore_state(&self, persisted: PersistedState) {
        let mut account = self.account.write().await;
        let mut prices = self.prices.write().await;

        account.initial_balance = persisted.initial_balance;
        account.cash = persisted.cash;
        account.realized_pnl = persisted.realized_pnl;
        account.total_fees = persisted.total_fees;
        account.order_count = persisted.order_count;

        account.positions = persisted
            .positions
            .into_values()
            .filter(|pos| pos.quantity > Decimal::ZERO)
            .map(|pos| {
                if pos.last_price > Decimal::ZERO {
                    prices.insert(pos.symbol.clone(), pos.last_price);
                }
                (
                    pos.symbol.clone(),
                    PaperPosition {
                        symbol: pos.symbol,
                        quantity: pos.quantity,
                        avg_entry_price: pos.avg_entry_price,
                        opened_at: pos.opened_at,
                    },
                )
            })
            .collect();

        // Keep order ids unique across restarts
        self.order_id_counter
            .store(persisted.order_count + 1, Ordering::SeqCst);

        info!(
            cash = %account.cash,
            positions = account.positions.len(),
            order_count = account.order_count,
            "Paper broker state restored from persistence"
        );
    }
}

#[async_trait]
impl MarketDataProvider for PaperBroker {
    async fn get_bars(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<PriceSeries, BrokerError> {
        let bars = self.bars.read().await;
        let series = bars
            .get(symbol)
            .ok_or_else(|| BrokerError::data_unavailable(symbol, "no bars loaded"))?;

        let Some(last) = series.bars().last() else {
            return Ok(series.clone());
        };
        // Anchor the window on the newest bar so canned data stays usable
        let cutoff = last.timestamp - chrono::Duration::days(i64::from(lookback_days));
        Ok(series.since(cutoff))
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.quotes
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::data_unavailable(symbol, "no quote loaded"))
    }
}

#[async_trait]
impl Brokerage for PaperBroker {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let account = self.account.read().await;
        let Some(pos) = account.positions.get(symbol) else {
            return Ok(None);
        };
        let current_price = self
            .prices
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(pos.avg_entry_price);

        Ok(Some(Position {
            symbol: pos.symbol.clone(),
            quantity: pos.quantity,
            avg_entry_price: pos.avg_entry_price,
            current_price,
        }))
    }

    async fn submit_order(&self, order: &MarketOrder) -> Result<OrderAck, BrokerError> {
        if order.qty <= Decimal::ZERO {
            return Err(BrokerError::rejected(&order.symbol, "quantity must be positive"));
        }

        let price = self
            .prices
            .read()
            .await
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| BrokerError::rejected(&order.symbol, "no market price"))?;

        let mut account = self.account.write().await;
        let notional = order.qty * price;
        let fee = self.fees.fees_for(order.side, price, order.qty);

        match order.side {
            OrderSide::Buy => {
                if notional > account.cash {
                    warn!(
                        symbol = %order.symbol,
                        notional = %notional,
                        cash = %account.cash,
                        "Paper buy rejected: insufficient cash"
                    );
                    return Err(BrokerError::rejected(&order.symbol, "insufficient buying power"));
                }
                account.cash -= notional;
                let position = account
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| PaperPosition {
                        symbol: order.symbol.clone(),
                        quantity: Decimal::ZERO,
                        avg_entry_price: Decimal::ZERO,
                        opened_at: Utc::now(),
                    });
                let new_qty = position.quantity + order.qty;
                position.avg_entry_price =
                    (position.quantity * position.avg_entry_price + notional) / new_qty;
                position.quantity = new_qty;
            }
            OrderSide::Sell => {
                let (held, entry) = account
                    .positions
                    .get(&order.symbol)
                    .map(|p| (p.quantity, p.avg_entry_price))
                    .unwrap_or((Decimal::ZERO, Decimal::ZERO));
                if order.qty > held {
                    warn!(
                        symbol = %order.symbol,
                        qty = %order.qty,
                        held = %held,
                        "Paper sell rejected: insufficient position"
                    );
                    return Err(BrokerError::rejected(&order.symbol, "insufficient position"));
                }
                account.cash += notional - fee;
                account.realized_pnl += (price - entry) * order.qty - fee;
                if order.qty == held {
                    account.positions.remove(&order.symbol);
                } else if let Some(position) = account.positions.get_mut(&order.symbol) {
                    position.quantity -= order.qty;
                }
            }
        }

        account.total_fees += fee;
        account.order_count += 1;
        let order_id = self.next_order_id();

        info!(
            order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.qty,
            price = %price,
            fee = %fee,
            cash = %account.cash,
            "Paper order filled"
        );

        Ok(OrderAck {
            id: format!("paper-{order_id}"),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            status: OrderStatus::Filled,
            filled_avg_price: Some(price),
        })
    }

    async fn mark_price(&self, symbol: &str, price: Decimal) {
        self.set_price(symbol, price).await;
    }
}

#[async_trait]
impl PriceFeed for PaperBroker {
    async fn subscribe(
        &self,
        symbols: Vec<String>,
    ) -> Result<mpsc::Receiver<FeedEvent>, BrokerError> {
        let (tx, rx) = mpsc::channel(256);
        tx.send(FeedEvent::Connected)
            .await
            .map_err(|e| BrokerError::StreamDisconnected(e.to_string()))?;
        *self.feed.lock().await = Some(tx);
        debug!(symbols = symbols.len(), "Paper feed subscribed");
        Ok(rx)
    }

    async fn close(&self) {
        self.feed.lock().await.take();
        debug!("Paper feed closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn broker_with_price(symbol: &str, price: Decimal) -> PaperBroker {
        let broker = PaperBroker::new(dec!(13000));
        broker.mark_price(symbol, price).await;
        broker
    }

    async fn buy(broker: &PaperBroker, symbol: &str, qty: Decimal) -> OrderAck {
        broker
            .submit_order(&MarketOrder::day(symbol, qty, OrderSide::Buy))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_buy_fills_at_mark_without_fees() {
        let broker = broker_with_price("YPF", dec!(20)).await;
        let ack = buy(&broker, "YPF", dec!(100)).await;

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_avg_price, Some(dec!(20)));

        let account = broker.account().await;
        assert_eq!(account.cash, dec!(11000));
        assert_eq!(account.total_fees, Decimal::ZERO);

        let position = broker.get_position("YPF").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(100));
        assert_eq!(position.avg_entry_price, dec!(20));
    }

    #[tokio::test]
    async fn test_average_entry_price_is_weighted() {
        let broker = broker_with_price("YPF", dec!(20)).await;
        buy(&broker, "YPF", dec!(100)).await;
        broker.mark_price("YPF", dec!(26)).await;
        buy(&broker, "YPF", dec!(50)).await;

        let position = broker.get_position("YPF").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(150));
        assert_eq!(position.avg_entry_price, dec!(22));
        assert_eq!(position.current_price, dec!(26));
    }

    #[tokio::test]
    async fn test_sell_realizes_pnl_net_of_fees() {
        let broker = broker_with_price("PAM", dec!(50)).await;
        buy(&broker, "PAM", dec!(10)).await;
        broker.mark_price("PAM", dec!(60)).await;

        broker
            .submit_order(&MarketOrder::day("PAM", dec!(10), OrderSide::Sell))
            .await
            .unwrap();

        // SEC 600 * 22.9e-6 -> 0.02, TAF 10 * 0.000119 -> 0.01
        let account = broker.account().await;
        assert_eq!(account.total_fees, dec!(0.03));
        assert_eq!(account.realized_pnl, dec!(99.97));
        assert_eq!(account.cash, dec!(13099.97));
        assert!(broker.get_position("PAM").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversell_rejected() {
        let broker = broker_with_price("PAM", dec!(50)).await;
        buy(&broker, "PAM", dec!(10)).await;

        let err = broker
            .submit_order(&MarketOrder::day("PAM", dec!(11), OrderSide::Sell))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OrderRejected { .. }));

        let position = broker.get_position("PAM").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_overbuy_rejected() {
        let broker = broker_with_price("MELI", dec!(1500)).await;
        let err = broker
            .submit_order(&MarketOrder::day("MELI", dec!(9), OrderSide::Buy))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OrderRejected { .. }));
        assert_eq!(broker.account().await.cash, dec!(13000));
    }

    #[tokio::test]
    async fn test_order_without_price_rejected() {
        let broker = PaperBroker::new(dec!(13000));
        let err = broker
            .submit_order(&MarketOrder::day("TEO", dec!(1), OrderSide::Buy))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OrderRejected { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_values_positions_at_marks() {
        let broker = broker_with_price("YPF", dec!(20)).await;
        buy(&broker, "YPF", dec!(100)).await;
        broker.mark_price("YPF", dec!(21)).await;

        let snapshot = broker.snapshot().await;
        assert_eq!(snapshot.market_value, dec!(2100));
        assert_eq!(snapshot.unrealized_pnl, dec!(100));
        assert_eq!(snapshot.equity, dec!(13100));
    }

    #[tokio::test]
    async fn test_export_and_restore_state() {
        let broker = broker_with_price("BBVA", dec!(10)).await;
        buy(&broker, "BBVA", dec!(200)).await;
        broker.mark_price("BBVA", dec!(11)).await;

        let exported = broker.export_state().await;
        assert_eq!(exported.positions["BBVA"].last_price, dec!(11));

        let restored = PaperBroker::new(dec!(13000));
        restored.restore_state(exported).await;

        assert_eq!(restored.snapshot().await, broker.snapshot().await);
        let ack = buy(&restored, "BBVA", dec!(1)).await;
        assert_eq!(ack.id, "paper-2");
    }

    #[tokio::test]
    async fn test_bars_filtered_by_lookback() {
        let broker = PaperBroker::new(dec!(13000));
        let bars = (0..10)
            .map(|day| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1 + day, 15, 0, 0).unwrap(),
                close: dec!(10),
                volume: dec!(1000),
            })
            .collect();
        broker.set_bars(PriceSeries::new("GGAL", bars)).await;

        let series = broker.get_bars("GGAL", 5).await.unwrap();
        assert_eq!(series.len(), 6);
        assert!(matches!(
            broker.get_bars("BMA", 5).await,
            Err(BrokerError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_feed_delivers_ticks_and_marks() {
        let broker = PaperBroker::new(dec!(13000));
        let mut rx = broker.subscribe(vec!["YPF".to_string()]).await.unwrap();
        assert_eq!(rx.recv().await, Some(FeedEvent::Connected));

        assert!(broker.push_tick("YPF", dec!(21.5)).await);
        match rx.recv().await {
            Some(FeedEvent::Tick(tick)) => assert_eq!(tick.price, dec!(21.5)),
            other => panic!("unexpected {other:?}"),
        }

        broker.close().await;
        assert!(!broker.push_tick("YPF", dec!(21.6)).await);
        assert_eq!(rx.recv().await, None);
    }
}
