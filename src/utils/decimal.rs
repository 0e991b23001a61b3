//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Lot size for a number of decimal places (0 = whole shares).
pub fn lot_size_for_precision(precision: u32) -> Decimal {
    Decimal::new(1, precision)
}

/// Round up to the next whole cent.
pub fn ceil_to_cent(value: Decimal) -> Decimal {
    (value * dec!(100)).ceil() / dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Lossy conversion for statistics. Out-of-range values become NaN.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Convert a statistic back into a decimal. Non-finite input yields `None`.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(round_down_to_lot(dec!(136.5), dec!(1)), dec!(136));
    }

    #[test]
    fn test_lot_size_for_precision() {
        assert_eq!(lot_size_for_precision(0), dec!(1));
        assert_eq!(lot_size_for_precision(2), dec!(0.01));
    }

    #[test]
    fn test_ceil_to_cent() {
        assert_eq!(ceil_to_cent(dec!(0.001)), dec!(0.01));
        assert_eq!(ceil_to_cent(dec!(1.23)), dec!(1.23));
        assert_eq!(ceil_to_cent(dec!(1.231)), dec!(1.24));
    }

    #[test]
    fn test_f64_bridge() {
        assert_eq!(to_f64(dec!(1.5)), 1.5);
        assert_eq!(from_f64(2.0), Some(dec!(2)));
        assert_eq!(from_f64(f64::NAN), None);
        assert_eq!(from_f64(f64::INFINITY), None);
    }
}
