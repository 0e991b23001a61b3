//! Hurst-weighted blend of momentum and mean reversion.

use tracing::debug;

use super::hurst::TrendStrengthEstimator;
use super::mean_reversion::MeanReversionSignal;
use super::momentum::{MomentumReading, MomentumSignal};
use super::{SignalError, NEUTRAL_HURST};
use crate::config::StrategyConfig;
use crate::portfolio::SymbolProfile;

/// Components of one blended evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendedSignal {
    pub momentum: MomentumReading,
    pub mean_reversion: f64,
    /// Hurst exponent, [`NEUTRAL_HURST`] when undefined
    pub hurst: f64,
    pub momentum_weight: f64,
    pub mean_rev_weight: f64,
    /// Whether the profile's risk multiplier was applied
    pub amplified: bool,
    pub combined: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalBlender {
    momentum: MomentumSignal,
    mean_reversion: MeanReversionSignal,
    trend: TrendStrengthEstimator,
    momentum_threshold: f64,
}

impl Default for SignalBlender {
    fn default() -> Self {
        Self::new(&StrategyConfig::default())
    }
}

impl SignalBlender {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            momentum: MomentumSignal::new(config.momentum_window, config.volatility_window),
            mean_reversion: MeanReversionSignal::new(config.mean_rev_window),
            trend: TrendStrengthEstimator::new(config.hurst_min_lag, config.hurst_max_lag),
            momentum_threshold: config.momentum_threshold,
        }
    }

    /// Shortest series every component can evaluate.
    pub fn min_len(&self) -> usize {
        self.momentum
            .min_len()
            .max(self.mean_reversion.window)
            .max(self.trend.min_len())
    }

    pub fn momentum(&self) -> &MomentumSignal {
        &self.momentum
    }

    pub fn trend(&self) -> &TrendStrengthEstimator {
        &self.trend
    }

    /// Hurst exponent, falling back to the neutral regime when undefined.
    pub fn hurst_or_neutral(&self, prices: &[f64]) -> Result<f64, SignalError> {
        match self.trend.estimate(prices) {
            Ok(h) => Ok(h),
            Err(SignalError::UndefinedSignal(what)) => {
                debug!(what, "Hurst undefined, using neutral regime");
                Ok(NEUTRAL_HURST)
            }
            Err(e) => Err(e),
        }
    }

    /// Blend the signals of `prices` for `symbol` under `profile`.
    pub fn blend(
        &self,
        symbol: &str,
        prices: &[f64],
        profile: &SymbolProfile,
    ) -> Result<BlendedSignal, SignalError> {
        super::require_len(prices, self.min_len())?;

        let momentum = self.momentum.compute(prices)?;
        let mean_reversion = self.mean_reversion.compute(prices)?;
        let hurst = self.hurst_or_neutral(prices)?;

        let (momentum_weight, mean_rev_weight) = reweight(hurst, profile);
        let mut combined =
            momentum_weight * momentum.risk_adjusted + mean_rev_weight * mean_reversion;

        let mut amplified = false;
        if let Some(multiplier) = profile.risk_multiplier {
            let trigger = profile
                .risk_multiplier_trigger
                .unwrap_or(self.momentum_threshold);
            if momentum.raw > trigger {
                combined *= multiplier;
                amplified = true;
            }
        }

        debug!(
            %symbol,
            momentum = momentum.risk_adjusted,
            mean_reversion,
            hurst,
            combined,
            amplified,
            "Signal blended"
        );

        Ok(BlendedSignal {
            momentum,
            mean_reversion,
            hurst,
            momentum_weight,
            mean_rev_weight,
            amplified,
            combined,
        })
    }
}

/// Scale profile weights by trend regime: trending series favour momentum,
/// mean-reverting ones favour reversion.
pub fn reweight(hurst: f64, profile: &SymbolProfile) -> (f64, f64) {
    if hurst > NEUTRAL_HURST {
        (
            profile.momentum_weight * hurst,
            profile.mean_rev_weight * (1.0 - hurst),
        )
    } else {
        (
            profile.momentum_weight * (1.0 - hurst),
            profile.mean_rev_weight * hurst,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;

    fn profile(momentum_weight: f64, mean_rev_weight: f64) -> SymbolProfile {
        SymbolProfile::new(
            "energy",
            dec!(0.35),
            momentum_weight,
            mean_rev_weight,
            dec!(0.15),
            dec!(0.30),
        )
    }

    fn noisy_uptrend(seed: u64, drift: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 100.0;
        (0..200)
            .map(|_| {
                price *= 1.0 + drift + rng.gen_range(-0.002..0.002);
                price
            })
            .collect()
    }

    #[test]
    fn test_neutral_hurst_damps_both_weights_symmetrically() {
        let p = profile(0.8, 0.2);
        let (m, r) = reweight(0.5, &p);
        assert!((m - 0.4).abs() < 1e-12);
        assert!((r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_trending_regime_favours_momentum() {
        let p = profile(0.5, 0.5);
        let (m, r) = reweight(0.8, &p);
        assert!((m - 0.4).abs() < 1e-12);
        assert!((r - 0.1).abs() < 1e-12);

        let (m, r) = reweight(0.2, &p);
        assert!((m - 0.4).abs() < 1e-12);
        assert!((r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_combined_is_weighted_sum() {
        let blender = SignalBlender::default();
        let prices = noisy_uptrend(11, 0.001);
        let p = profile(0.6, 0.4);

        let signal = blender.blend("PAM", &prices, &p).unwrap();
        let expected = signal.momentum_weight * signal.momentum.risk_adjusted
            + signal.mean_rev_weight * signal.mean_reversion;
        assert!(!signal.amplified);
        assert!((signal.combined - expected).abs() < 1e-12);
    }

    #[test]
    fn test_risk_multiplier_applies_above_trigger_only() {
        let blender = SignalBlender::default();
        let prices = noisy_uptrend(5, 0.03);
        let plain = profile(0.8, 0.2);
        let amplified = plain.clone().with_risk_multiplier(1.2, None);

        let base = blender.blend("YPF", &prices, &plain).unwrap();
        let boosted = blender.blend("YPF", &prices, &amplified).unwrap();
        assert!(base.momentum.raw > 0.02);
        assert!(boosted.amplified);
        assert!((boosted.combined - base.combined * 1.2).abs() < 1e-9);

        // A per-symbol trigger overrides the strategy threshold
        let strict = plain.with_risk_multiplier(1.2, Some(0.5));
        let unboosted = blender.blend("YPF", &prices, &strict).unwrap();
        assert!(!unboosted.amplified);
        assert_eq!(unboosted.combined, base.combined);
    }

    #[test]
    fn test_short_series_is_insufficient() {
        let blender = SignalBlender::default();
        let err = blender
            .blend("YPF", &[100.0; 10], &profile(0.8, 0.2))
            .unwrap_err();
        assert!(matches!(err, SignalError::InsufficientData { needed: 21, .. }));
    }

    #[test]
    fn test_undefined_hurst_falls_back_to_neutral() {
        let blender = SignalBlender::default();
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let signal = blender.blend("PAM", &prices, &profile(0.6, 0.4)).unwrap();
        assert_eq!(signal.hurst, NEUTRAL_HURST);
        assert!((signal.momentum_weight - 0.3).abs() < 1e-12);
    }
}
