//! Realized performance tracking.
//!
//! Tracks closed trades and realized P&L per UTC day, and derives win rate,
//! average win/loss, annualized Sharpe ratio and maximum drawdown of the
//! cumulative daily-return curve.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::analysis::stats::{mean, sample_std};
use crate::utils::decimal::{safe_div, to_f64};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// A realized (fully or partially closed) trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(
        symbol: &str,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            exit_price,
            quantity,
            pnl: (exit_price - entry_price) * quantity,
            reason: reason.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub trade_count: usize,
    pub total_pnl: Decimal,
    /// Fraction of trades with positive P&L
    pub win_rate: Decimal,
    pub avg_win: Option<Decimal>,
    pub avg_loss: Option<Decimal>,
    /// Annualized; `None` with fewer than two days or no dispersion
    pub sharpe_ratio: Option<f64>,
    /// Largest fall of cumulative daily return from its running peak, as a
    /// non-negative fraction of capital
    pub max_drawdown: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    capital: Decimal,
    trades: Vec<TradeRecord>,
    daily_pnl: BTreeMap<NaiveDate, Decimal>,
}

impl PerformanceTracker {
    /// Returns are expressed against `capital`.
    pub fn new(capital: Decimal) -> Self {
        Self {
            capital,
            trades: Vec::new(),
            daily_pnl: BTreeMap::new(),
        }
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        *self
            .daily_pnl
            .entry(trade.timestamp.date_naive())
            .or_insert(Decimal::ZERO) += trade.pnl;

        info!(
            symbol = %trade.symbol,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            qty = %trade.quantity,
            pnl = %trade.pnl,
            reason = %trade.reason,
            "Trade closed"
        );
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Daily realized P&L as a fraction of capital, oldest first.
    pub fn daily_returns(&self) -> Vec<f64> {
        self.daily_pnl
            .values()
            .map(|pnl| to_f64(safe_div(*pnl, self.capital)))
            .collect()
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total_pnl: Decimal = self.trades.iter().map(|t| t.pnl).sum();

        let wins: Vec<Decimal> = self
            .trades
            .iter()
            .map(|t| t.pnl)
            .filter(|p| *p > Decimal::ZERO)
            .collect();
        let losses: Vec<Decimal> = self
            .trades
            .iter()
            .map(|t| t.pnl)
            .filter(|p| *p < Decimal::ZERO)
            .collect();

        let win_rate = safe_div(Decimal::from(wins.len()), Decimal::from(self.trades.len()));

        let returns = self.daily_returns();

        PerformanceSummary {
            trade_count: self.trades.len(),
            total_pnl,
            win_rate,
            avg_win: average(&wins),
            avg_loss: average(&losses),
            sharpe_ratio: sharpe_ratio(&returns),
            max_drawdown: max_drawdown(&returns),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(
            trades = summary.trade_count,
            total_pnl = %summary.total_pnl,
            win_rate = %summary.win_rate.round_dp(4),
            avg_win = ?summary.avg_win,
            avg_loss = ?summary.avg_loss,
            sharpe = ?summary.sharpe_ratio,
            max_drawdown = summary.max_drawdown,
            "Performance summary"
        );
    }
}

fn average(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<Decimal>() / Decimal::from(values.len()))
}

/// Annualized Sharpe ratio of daily returns (zero risk-free rate).
pub fn sharpe_ratio(daily_returns: &[f64]) -> Option<f64> {
    let avg = mean(daily_returns)?;
    let std = sample_std(daily_returns)?;
    if std <= 0.0 || !std.is_finite() {
        return None;
    }
    Some(avg / std * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Maximum drawdown of the cumulative sum of `daily_returns`.
pub fn max_drawdown(daily_returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for r in daily_returns {
        cumulative += r;
        peak = peak.max(cumulative);
        worst = worst.max(peak - cumulative);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_trade_pnl_and_win_rate() {
        let mut tracker = PerformanceTracker::new(dec!(13000));
        tracker.record_trade(TradeRecord::new("YPF", dec!(20), dec!(26), dec!(100), "take_profit", at(4)));
        tracker.record_trade(TradeRecord::new("PAM", dec!(60), dec!(53), dec!(10), "stop_loss", at(4)));
        tracker.record_trade(TradeRecord::new("BBVA", dec!(10), dec!(10.5), dec!(100), "rebalance", at(5)));

        let summary = tracker.summary();
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.total_pnl, dec!(600) - dec!(70) + dec!(50));
        assert_eq!(summary.avg_win, Some(dec!(325)));
        assert_eq!(summary.avg_loss, Some(dec!(-70)));
        assert_eq!(summary.win_rate.round_dp(4), dec!(0.6667));
    }

    #[test]
    fn test_daily_returns_aggregate_by_day() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        tracker.record_trade(TradeRecord::new("YPF", dec!(10), dec!(11), dec!(10), "take_profit", at(4)));
        tracker.record_trade(TradeRecord::new("YPF", dec!(10), dec!(12), dec!(10), "take_profit", at(4)));
        tracker.record_trade(TradeRecord::new("PAM", dec!(10), dec!(9), dec!(10), "stop_loss", at(6)));

        let returns = tracker.daily_returns();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.03).abs() < 1e-12);
        assert!((returns[1] + 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_empty_tracker() {
        let summary = PerformanceTracker::new(dec!(13000)).summary();
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.win_rate, Decimal::ZERO);
        assert!(summary.avg_win.is_none());
        assert!(summary.sharpe_ratio.is_none());
        assert_eq!(summary.max_drawdown, 0.0);
    }

    #[test]
    fn test_max_drawdown_of_cumulative_returns() {
        // cumulative: 0.02, 0.05, 0.01, 0.00, 0.04
        let returns = [0.02, 0.03, -0.04, -0.01, 0.04];
        assert!((max_drawdown(&returns) - 0.05).abs() < 1e-12);
        assert_eq!(max_drawdown(&[0.01, 0.02]), 0.0);
    }

    #[test]
    fn test_sharpe_ratio() {
        let returns = [0.01, 0.02, 0.03];
        // mean 0.02, sample std 0.01
        let sharpe = sharpe_ratio(&returns).unwrap();
        assert!((sharpe - 2.0 * 252f64.sqrt()).abs() < 1e-9);
        assert!(sharpe_ratio(&[0.01]).is_none());
        assert!(sharpe_ratio(&[0.01, 0.01]).is_none());
    }
}
