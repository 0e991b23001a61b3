//! Signal-driven position sizing.

use rust_decimal::Decimal;

use crate::config::{CapitalConfig, StrategyConfig};
use crate::portfolio::SymbolProfile;
use crate::utils::decimal::{from_f64, lot_size_for_precision, round_down_to_lot, to_f64};

/// Sizing breakdown for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPosition {
    /// Capital times target allocation
    pub base_value: Decimal,
    /// `min(|signal|, max_position_increase)`
    pub adjustment: Decimal,
    pub value: Decimal,
    /// `value / price` rounded down to the lot size
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    max_position_increase: Decimal,
    lot_size: Decimal,
}

impl PositionSizer {
    pub fn new(max_position_increase: Decimal, quantity_precision: u32) -> Self {
        Self {
            max_position_increase,
            lot_size: lot_size_for_precision(quantity_precision),
        }
    }

    pub fn from_config(strategy: &StrategyConfig, capital: &CapitalConfig) -> Self {
        Self::new(strategy.max_position_increase, capital.quantity_precision)
    }

    /// Target position value. Conviction scales the base allocation up to
    /// `max_position_increase`; the result is never negative.
    pub fn target_value(
        &self,
        signal: f64,
        profile: &SymbolProfile,
        capital: Decimal,
    ) -> (Decimal, Decimal, Decimal) {
        let base_value = capital * profile.target_allocation;
        // Clamp before converting: huge magnitudes overflow Decimal
        let conviction = if signal.is_nan() {
            Decimal::ZERO
        } else {
            from_f64(signal.abs().min(to_f64(self.max_position_increase)))
                .unwrap_or(Decimal::ZERO)
        };
        let adjustment = conviction.min(self.max_position_increase);
        (base_value, adjustment, base_value * adjustment)
    }

    /// Size a position at `price`.
    pub fn size(
        &self,
        signal: f64,
        profile: &SymbolProfile,
        capital: Decimal,
        price: Decimal,
    ) -> TargetPosition {
        let (base_value, adjustment, value) = self.target_value(signal, profile, capital);
        let quantity = if price > Decimal::ZERO {
            round_down_to_lot(value / price, self.lot_size)
        } else {
            Decimal::ZERO
        };

        TargetPosition {
            base_value,
            adjustment,
            value,
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ypf() -> SymbolProfile {
        SymbolProfile::new("energy", dec!(0.35), 0.8, 0.2, dec!(0.15), dec!(0.30))
    }

    #[test]
    fn test_conviction_is_capped() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        let (base, adjustment, value) = sizer.target_value(2.0, &ypf(), dec!(13000));
        assert_eq!(base, dec!(4550));
        assert_eq!(adjustment, dec!(1.5));
        assert_eq!(value, dec!(6825));
    }

    #[test]
    fn test_negative_signal_sizes_by_magnitude() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        let (_, adjustment, value) = sizer.target_value(-0.5, &ypf(), dec!(13000));
        assert_eq!(adjustment, dec!(0.5));
        assert_eq!(value, dec!(2275));
    }

    #[test]
    fn test_extreme_signal_sizes_to_cap() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        for signal in [1e30, -1e300, f64::INFINITY] {
            let (_, adjustment, value) = sizer.target_value(signal, &ypf(), dec!(13000));
            assert_eq!(adjustment, dec!(1.5));
            assert_eq!(value, dec!(6825));
        }
    }

    #[test]
    fn test_nan_signal_sizes_to_zero() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        let (_, _, value) = sizer.target_value(f64::NAN, &ypf(), dec!(13000));
        assert_eq!(value, Decimal::ZERO);
    }

    #[test]
    fn test_quantity_rounded_down_to_whole_shares() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        let target = sizer.size(2.0, &ypf(), dec!(13000), dec!(50));
        // 6825 / 50 = 136.5
        assert_eq!(target.quantity, dec!(136));

        let fractional = PositionSizer::new(dec!(1.5), 2);
        let target = fractional.size(2.0, &ypf(), dec!(13000), dec!(50));
        assert_eq!(target.quantity, dec!(136.50));
    }

    #[test]
    fn test_non_positive_price_sizes_to_zero() {
        let sizer = PositionSizer::new(dec!(1.5), 0);
        let target = sizer.size(1.0, &ypf(), dec!(13000), Decimal::ZERO);
        assert_eq!(target.quantity, Decimal::ZERO);
    }
}
