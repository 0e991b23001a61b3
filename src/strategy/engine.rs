//! Tick-driven trading loop.
//!
//! Each tick is evaluated in its own task. A per-symbol lock keeps at most
//! one evaluation per symbol in flight; ticks that arrive meanwhile are
//! coalesced. The trading sleeve is refreshed by a separate periodic task.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{CandidateSelector, EngineError, OrderExecutor};
use crate::analysis::SignalBlender;
use crate::broker::{Brokerage, FeedEvent, MarketDataProvider, OrderSide, Position, PriceFeed, Tick};
use crate::config::Config;
use crate::events::EventSink;
use crate::metrics::{PerformanceSummary, PerformanceTracker, TradeRecord};
use crate::portfolio::{PortfolioConfig, Sleeve, SymbolProfile};
use crate::risk::{ExitPolicy, ExitReason, PositionSizer, RebalanceOrder};

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    /// Symbol is in neither the core nor the current sleeve
    Ignored,
    /// Another evaluation for the symbol is in flight
    Busy,
    Hold,
    Exited(ExitReason),
    Rebalanced(RebalanceOrder),
}

struct EngineInner {
    portfolio: Arc<PortfolioConfig>,
    blender: SignalBlender,
    sizer: PositionSizer,
    exit_policy: ExitPolicy,
    selector: CandidateSelector,
    capital: Decimal,
    signal_lookback_days: u32,
    selection_interval: Duration,
    status_interval: Duration,
    data: Arc<dyn MarketDataProvider>,
    broker: Arc<dyn Brokerage>,
    feed: Arc<dyn PriceFeed>,
    events: Arc<dyn EventSink>,
    executor: OrderExecutor,
    performance: Mutex<PerformanceTracker>,
    symbol_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TradingEngine {
    inner: Arc<EngineInner>,
}

impl TradingEngine {
    pub fn new(
        config: &Config,
        portfolio: Arc<PortfolioConfig>,
        data: Arc<dyn MarketDataProvider>,
        broker: Arc<dyn Brokerage>,
        feed: Arc<dyn PriceFeed>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let blender = SignalBlender::new(&config.strategy);
        let capital = config.capital.initial_investment;

        Self {
            inner: Arc::new(EngineInner {
                portfolio,
                blender,
                sizer: PositionSizer::from_config(&config.strategy, &config.capital),
                exit_policy: ExitPolicy::new(config.strategy.rebalance_threshold),
                selector: CandidateSelector::new(config.selection.clone(), blender),
                capital,
                signal_lookback_days: config.strategy.signal_lookback_days,
                selection_interval: Duration::from_secs(config.selection.interval_secs),
                status_interval: Duration::from_secs(config.runtime.status_interval_secs.max(1)),
                executor: OrderExecutor::new(broker.clone(), events.clone()),
                data,
                broker,
                feed,
                events,
                performance: Mutex::new(PerformanceTracker::new(capital)),
                symbol_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn portfolio(&self) -> &Arc<PortfolioConfig> {
        &self.inner.portfolio
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        self.performance().summary()
    }

    /// Run until `shutdown` fires or the feed drops.
    ///
    /// Selects the sleeve once, subscribes, then dispatches ticks. On exit
    /// every in-flight evaluation is awaited before the feed is closed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), EngineError> {
        let inner = &self.inner;

        self.refresh_sleeve().await;

        let symbols = inner.portfolio.stream_symbols();
        info!(symbols = symbols.len(), "Subscribing to price feed");
        let mut rx = inner.feed.subscribe(symbols).await?;

        let selection_task = self.spawn_selection(shutdown.clone());

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut status = tokio::time::interval(inner.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.tick().await;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting ticks");
                    break Ok(());
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Evaluation task failed");
                    }
                }

                _ = status.tick() => {
                    self.log_status().await;
                }

                event = rx.recv() => match event {
                    Some(FeedEvent::Tick(tick)) => {
                        let engine = self.clone();
                        tasks.spawn(async move { engine.handle_tick(tick).await });
                    }
                    Some(FeedEvent::Connected) => info!("Price feed connected"),
                    Some(FeedEvent::Disconnected(reason)) => {
                        error!(%reason, "Price feed disconnected");
                        break Err(EngineError::StreamDisconnected(reason));
                    }
                    None => {
                        error!("Price feed channel closed");
                        break Err(EngineError::StreamDisconnected("feed channel closed".to_string()));
                    }
                },
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight evaluations");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Evaluation task failed");
            }
        }

        selection_task.abort();
        inner.feed.close().await;
        self.performance().log_summary();
        info!("Trading engine stopped");

        outcome
    }

    /// One selection pass; the sleeve is swapped atomically.
    pub async fn refresh_sleeve(&self) {
        let inner = &self.inner;
        let sleeve = inner
            .selector
            .refresh(&inner.portfolio, inner.data.as_ref(), inner.events.as_ref())
            .await;
        info!(sleeve = ?sleeve.symbols(), "Trading sleeve refreshed");
    }

    fn spawn_selection(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.selection_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already selected
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => engine.refresh_sleeve().await,
                }
            }
        })
    }

    async fn handle_tick(&self, tick: Tick) {
        match self.evaluate(&tick.symbol, tick.price).await {
            Ok(Evaluation::Busy) => {
                debug!(symbol = %tick.symbol, "Evaluation in flight, tick coalesced");
            }
            Ok(outcome) => {
                debug!(symbol = %tick.symbol, price = %tick.price, ?outcome, "Tick evaluated");
            }
            Err(e) => {
                warn!(symbol = %tick.symbol, error = %e, "Evaluation skipped");
            }
        }
    }

    /// Evaluate `symbol` at `price`: exits first, then the signal-sized
    /// rebalance. Entry from flat is a rebalance from zero.
    ///
    /// A long position in a symbol that has left the trading sleeve keeps
    /// the standard sleeve exits and is unwound to zero.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, symbol: &str, price: Decimal) -> Result<Evaluation, EngineError> {
        let inner = &self.inner;
        inner.broker.mark_price(symbol, price).await;

        let selected = inner.portfolio.profile_for(symbol).await;

        let lock = self.symbol_lock(symbol);
        let Ok(_guard) = lock.try_lock_owned() else {
            return Ok(Evaluation::Busy);
        };

        let position = inner.broker.get_position(symbol).await?;
        let current_qty = position.as_ref().map_or(Decimal::ZERO, |p| p.quantity);
        let held = position.as_ref().is_some_and(Position::is_long);

        let (sleeve, profile, deselected) = match selected {
            Some((sleeve, profile)) => (sleeve, profile, false),
            None if held => (Sleeve::Trading, self.deselected_profile(symbol), true),
            None => return Ok(Evaluation::Ignored),
        };

        if let Some(position) = position.as_ref().filter(|p| p.is_long()) {
            if let Some(reason) =
                inner
                    .exit_policy
                    .check_exit(position.avg_entry_price, price, &profile)
            {
                let exiting = Position {
                    current_price: price,
                    ..position.clone()
                };
                inner.executor.exit(&exiting, reason).await?;
                self.record_trade(&exiting, position.quantity, reason.as_str());
                return Ok(Evaluation::Exited(reason));
            }
        }

        let target_qty = if deselected {
            info!(%current_qty, "Symbol left the trading sleeve, unwinding");
            Decimal::ZERO
        } else {
            let series = inner.data.get_bars(symbol, inner.signal_lookback_days).await?;
            let signal = inner.blender.blend(symbol, &series.closes(), &profile)?;
            let target = inner.sizer.size(signal.combined, &profile, inner.capital, price);
            // Long only: bearish conviction means flat
            let target_qty = if signal.combined < 0.0 {
                Decimal::ZERO
            } else {
                target.quantity
            };

            debug!(
                %sleeve,
                combined = signal.combined,
                hurst = signal.hurst,
                target_value = %target.value,
                %target_qty,
                %current_qty,
                "Target computed"
            );
            target_qty
        };

        let Some(order) = inner.exit_policy.rebalance(current_qty, target_qty) else {
            return Ok(Evaluation::Hold);
        };

        inner.executor.rebalance(symbol, &order, price).await?;
        if order.side == OrderSide::Sell {
            if let Some(position) = position.as_ref().filter(|p| p.is_long()) {
                let closed = Position {
                    current_price: price,
                    ..position.clone()
                };
                self.record_trade(&closed, order.quantity.min(position.quantity), "rebalance");
            }
        }
        Ok(Evaluation::Rebalanced(order))
    }

    /// Standard sleeve profile for a symbol no longer in the sleeve.
    fn deselected_profile(&self, symbol: &str) -> SymbolProfile {
        let portfolio = &self.inner.portfolio;
        let mut profile = portfolio.sleeve_profile().clone();
        if let Some(sector) = portfolio.universe().sector_of(symbol) {
            profile.sector = sector.to_string();
        }
        profile
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .symbol_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(symbol.to_string()).or_default().clone()
    }

    fn performance(&self) -> std::sync::MutexGuard<'_, PerformanceTracker> {
        self.inner
            .performance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_trade(&self, position: &Position, quantity: Decimal, reason: &str) {
        self.performance().record_trade(TradeRecord::new(
            &position.symbol,
            position.avg_entry_price,
            position.current_price,
            quantity,
            reason,
            chrono::Utc::now(),
        ));
    }

    async fn log_status(&self) {
        let sleeve = self.inner.portfolio.sleeve().await;
        let summary = self.performance_summary();
        info!(
            core = self.inner.portfolio.core().len(),
            sleeve = ?sleeve.symbols(),
            trades = summary.trade_count,
            total_pnl = %summary.total_pnl,
            win_rate = %summary.win_rate.round_dp(4),
            sharpe = ?summary.sharpe_ratio,
            max_drawdown = summary.max_drawdown,
            "Strategy status"
        );
    }
}
