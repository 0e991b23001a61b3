//! Signal generation: trend strength, momentum, mean reversion and the
//! blend of the three.

pub mod blender;
pub mod hurst;
pub mod mean_reversion;
pub mod momentum;
pub mod stats;

pub use blender::{BlendedSignal, SignalBlender};
pub use hurst::TrendStrengthEstimator;
pub use mean_reversion::MeanReversionSignal;
pub use momentum::{MomentumReading, MomentumSignal};

use thiserror::Error;

/// Hurst exponent of a random walk; also the neutral fallback.
pub const NEUTRAL_HURST: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("insufficient data: need {needed} prices, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("undefined {0}: zero variance")]
    UndefinedSignal(&'static str),
}

pub(crate) fn require_len(values: &[f64], needed: usize) -> Result<(), SignalError> {
    if values.len() < needed {
        return Err(SignalError::InsufficientData {
            needed,
            available: values.len(),
        });
    }
    Ok(())
}
