//! Hurst exponent estimation.
//!
//! For each lag `L` the variance of the `L`-step differences scales as
//! `L^(2H)`, so half the log-log regression slope is `H`. Values above 0.5
//! indicate a trending series, below 0.5 a mean-reverting one.

use super::stats::{ols_slope, population_variance};
use super::{require_len, SignalError};

#[derive(Debug, Clone, Copy)]
pub struct TrendStrengthEstimator {
    pub min_lag: usize,
    pub max_lag: usize,
}

impl Default for TrendStrengthEstimator {
    fn default() -> Self {
        Self {
            min_lag: 2,
            max_lag: 20,
        }
    }
}

impl TrendStrengthEstimator {
    pub fn new(min_lag: usize, max_lag: usize) -> Self {
        Self { min_lag, max_lag }
    }

    /// Prices needed for the largest lag to have at least one difference.
    pub fn min_len(&self) -> usize {
        self.max_lag + 1
    }

    /// Hurst exponent of `prices`.
    ///
    /// Fails with `InsufficientData` when the series is shorter than
    /// [`min_len`](Self::min_len) and `UndefinedSignal` when any lag has
    /// zero variance.
    pub fn estimate(&self, prices: &[f64]) -> Result<f64, SignalError> {
        require_len(prices, self.min_len())?;

        let mut log_lags = Vec::with_capacity(self.max_lag - self.min_lag + 1);
        let mut log_vars = Vec::with_capacity(log_lags.capacity());

        for lag in self.min_lag..=self.max_lag {
            let diffs: Vec<f64> = prices
                .iter()
                .zip(&prices[lag..])
                .map(|(earlier, later)| later - earlier)
                .collect();
            let variance = population_variance(&diffs).unwrap_or(0.0);
            if variance <= 0.0 || !variance.is_finite() {
                return Err(SignalError::UndefinedSignal("hurst exponent"));
            }
            log_lags.push((lag as f64).ln());
            log_vars.push(variance.ln());
        }

        let slope =
            ols_slope(&log_lags, &log_vars).ok_or(SignalError::UndefinedSignal("hurst exponent"))?;
        Ok(slope / 2.0)
    }
}
