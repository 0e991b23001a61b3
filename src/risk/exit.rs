//! Stop-loss, take-profit and rebalance decisions.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::broker::OrderSide;
use crate::portfolio::SymbolProfile;

/// Why a position was liquidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order moving the current quantity to the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalanceOrder {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub target: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExitPolicy {
    rebalance_threshold: Decimal,
}

impl ExitPolicy {
    pub fn new(rebalance_threshold: Decimal) -> Self {
        Self {
            rebalance_threshold,
        }
    }

    /// Exit check for a long position. Thresholds are strict: a return of
    /// exactly `-stop_loss` or `take_profit` holds.
    pub fn check_exit(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        profile: &SymbolProfile,
    ) -> Option<ExitReason> {
        if entry_price <= Decimal::ZERO {
            return None;
        }
        let returns = (current_price - entry_price) / entry_price;

        if returns < -profile.stop_loss {
            Some(ExitReason::StopLoss)
        } else if returns > profile.take_profit {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    /// Order needed to reach `target_qty`, if the deviation exceeds the
    /// threshold. A flat position rebalances to any non-zero target.
    pub fn rebalance(&self, current_qty: Decimal, target_qty: Decimal) -> Option<RebalanceOrder> {
        let target = target_qty.max(Decimal::ZERO);
        if target == current_qty {
            return None;
        }

        if current_qty != Decimal::ZERO {
            let deviation = (target - current_qty).abs() / current_qty.abs();
            if deviation <= self.rebalance_threshold {
                return None;
            }
        }

        let side = if target > current_qty {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };

        Some(RebalanceOrder {
            side,
            quantity: (target - current_qty).abs(),
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn profile() -> SymbolProfile {
        SymbolProfile::new("energy", dec!(0.35), 0.8, 0.2, dec!(0.15), dec!(0.30))
    }

    #[test]
    fn test_exit_thresholds() {
        let policy = ExitPolicy::new(dec!(0.10));
        let p = profile();

        assert_eq!(
            policy.check_exit(dec!(100), dec!(84), &p),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            policy.check_exit(dec!(100), dec!(131), &p),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(policy.check_exit(dec!(100), dec!(110), &p), None);
    }

    #[test]
    fn test_exit_boundaries_hold() {
        let policy = ExitPolicy::new(dec!(0.10));
        let p = profile();
        assert_eq!(policy.check_exit(dec!(100), dec!(85), &p), None);
        assert_eq!(policy.check_exit(dec!(100), dec!(130), &p), None);
    }

    #[test]
    fn test_flat_position_always_rebalances() {
        let policy = ExitPolicy::new(dec!(0.10));
        let order = policy.rebalance(Decimal::ZERO, dec!(50)).unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.quantity, dec!(50));
    }

    #[test]
    fn test_flat_to_zero_target_does_nothing() {
        let policy = ExitPolicy::new(dec!(0.10));
        assert!(policy.rebalance(Decimal::ZERO, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_rebalance_threshold() {
        let policy = ExitPolicy::new(dec!(0.10));
        // 10% exactly does not trigger
        assert!(policy.rebalance(dec!(100), dec!(110)).is_none());

        let up = policy.rebalance(dec!(100), dec!(111)).unwrap();
        assert_eq!(up.side, OrderSide::Buy);
        assert_eq!(up.quantity, dec!(11));

        let down = policy.rebalance(dec!(100), dec!(80)).unwrap();
        assert_eq!(down.side, OrderSide::Sell);
        assert_eq!(down.quantity, dec!(20));
        assert_eq!(down.target, dec!(80));
    }

    #[test]
    fn test_negative_target_is_clamped_to_flat() {
        let policy = ExitPolicy::new(dec!(0.10));
        let order = policy.rebalance(dec!(40), dec!(-10)).unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.quantity, dec!(40));
        assert_eq!(order.target, Decimal::ZERO);
    }
}
