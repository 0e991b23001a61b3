//! Z-score mean reversion signal.

use super::stats::{mean, sample_std, tail};
use super::{require_len, SignalError};

#[derive(Debug, Clone, Copy)]
pub struct MeanReversionSignal {
    pub window: usize,
}

impl Default for MeanReversionSignal {
    fn default() -> Self {
        Self { window: 5 }
    }
}

impl MeanReversionSignal {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    /// Z-score of the latest price against the trailing window; `None` on
    /// zero dispersion.
    pub fn z_score(&self, prices: &[f64]) -> Result<Option<f64>, SignalError> {
        require_len(prices, self.window)?;
        let Some(window) = tail(prices, self.window) else {
            return Ok(None);
        };
        let (Some(avg), Some(std)) = (mean(window), sample_std(window)) else {
            return Ok(None);
        };
        if std <= 1e-12 || !std.is_finite() {
            return Ok(None);
        }
        let last = window[window.len() - 1];
        Ok(Some((last - avg) / std))
    }

    /// Negated z-score, positive when price sits below its recent mean.
    /// Zero dispersion gives no signal.
    pub fn compute(&self, prices: &[f64]) -> Result<f64, SignalError> {
        Ok(self.z_score(prices)?.map(|z| -z).unwrap_or(0.0))
    }
}
