//! Risk-adjusted time-series momentum.

use super::stats::{mean, pct_returns, sample_std, tail};
use super::{require_len, SignalError};

/// Trading days used to annualize hourly-return volatility.
const ANNUALIZATION_DAYS: f64 = 252.0;

/// Volatility at or below this is treated as zero.
const VOLATILITY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumReading {
    /// Trailing mean of simple returns
    pub raw: f64,
    /// Annualized standard deviation of returns
    pub volatility: f64,
    /// `raw / volatility`, zero when volatility is zero
    pub risk_adjusted: f64,
}

impl MomentumReading {
    /// Whether volatility is usable as a divisor.
    pub fn has_volatility(&self) -> bool {
        self.volatility.is_finite() && self.volatility > VOLATILITY_EPSILON
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MomentumSignal {
    pub momentum_window: usize,
    pub volatility_window: usize,
}

impl Default for MomentumSignal {
    fn default() -> Self {
        Self {
            momentum_window: 20,
            volatility_window: 10,
        }
    }
}

impl MomentumSignal {
    pub fn new(momentum_window: usize, volatility_window: usize) -> Self {
        Self {
            momentum_window,
            volatility_window,
        }
    }

    /// Prices needed to fill both return windows.
    pub fn min_len(&self) -> usize {
        self.momentum_window.max(self.volatility_window) + 1
    }

    pub fn compute(&self, prices: &[f64]) -> Result<MomentumReading, SignalError> {
        require_len(prices, self.min_len())?;
        let returns = pct_returns(prices);

        let raw = tail(&returns, self.momentum_window)
            .and_then(mean)
            .unwrap_or(0.0);
        let volatility = tail(&returns, self.volatility_window)
            .and_then(sample_std)
            .map(|std| std * ANNUALIZATION_DAYS.sqrt())
            .unwrap_or(0.0);

        let reading = MomentumReading {
            raw,
            volatility,
            risk_adjusted: 0.0,
        };
        let risk_adjusted = if reading.has_volatility() {
            raw / volatility
        } else {
            0.0
        };

        Ok(MomentumReading {
            risk_adjusted,
            ..reading
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_series_has_positive_momentum() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 + 0.1 * (i * i) as f64).collect();
        let reading = MomentumSignal::default().compute(&prices).unwrap();
        assert!(reading.raw > 0.0);
        assert!(reading.volatility > 0.0);
        assert!(reading.risk_adjusted > 0.0);
    }

    #[test]
    fn test_falling_series_has_negative_momentum() {
        let prices: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 - 0.05 * (i * i) as f64).collect();
        let reading = MomentumSignal::default().compute(&prices).unwrap();
        assert!(reading.raw < 0.0);
        assert!(reading.risk_adjusted < 0.0);
    }

    #[test]
    fn test_constant_growth_has_zero_volatility_and_no_signal() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let reading = MomentumSignal::default().compute(&prices).unwrap();
        assert!(reading.raw > 0.0);
        assert!(reading.volatility < 1e-9);
        assert_eq!(reading.risk_adjusted, 0.0);
    }

    #[test]
    fn test_requires_full_window() {
        let err = MomentumSignal::default().compute(&[100.0; 20]).unwrap_err();
        assert_eq!(
            err,
            SignalError::InsufficientData {
                needed: 21,
                available: 20
            }
        );
    }
}
