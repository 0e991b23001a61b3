//! Core holdings, candidate universe and the dynamically selected trading
//! sleeve.
//!
//! Every symbol the engine trades is looked up here. The core is fixed for
//! the process lifetime; the trading sleeve is replaced wholesale by each
//! selection pass behind an `Arc` swap, so readers see either the old or
//! the new sleeve.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::PortfolioSettings;

/// Static per-symbol risk and signal configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolProfile {
    /// Fraction of capital allocated at unit conviction (0, 1]
    pub target_allocation: Decimal,
    pub sector: String,
    pub momentum_weight: f64,
    pub mean_rev_weight: f64,
    /// Fractional drawdown from entry that liquidates the position
    pub stop_loss: Decimal,
    /// Fractional gain from entry that liquidates the position
    pub take_profit: Decimal,
    /// Amplifies the blended signal while raw momentum exceeds the trigger
    #[serde(default)]
    pub risk_multiplier: Option<f64>,
    /// Raw momentum trigger for `risk_multiplier`; the strategy-wide
    /// `momentum_threshold` applies when unset
    #[serde(default)]
    pub risk_multiplier_trigger: Option<f64>,
}

impl SymbolProfile {
    pub fn new(
        sector: impl Into<String>,
        target_allocation: Decimal,
        momentum_weight: f64,
        mean_rev_weight: f64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Self {
        Self {
            target_allocation,
            sector: sector.into(),
            momentum_weight,
            mean_rev_weight,
            stop_loss,
            take_profit,
            risk_multiplier: None,
            risk_multiplier_trigger: None,
        }
    }

    pub fn with_risk_multiplier(mut self, multiplier: f64, trigger: Option<f64>) -> Self {
        self.risk_multiplier = Some(multiplier);
        self.risk_multiplier_trigger = trigger;
        self
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.target_allocation > Decimal::ZERO && self.target_allocation <= Decimal::ONE,
            "target_allocation must be in (0, 1]"
        );
        anyhow::ensure!(self.stop_loss > Decimal::ZERO, "stop_loss must be positive");
        anyhow::ensure!(self.take_profit > Decimal::ZERO, "take_profit must be positive");
        anyhow::ensure!(
            self.momentum_weight >= 0.0 && self.mean_rev_weight >= 0.0,
            "signal weights must not be negative"
        );
        if let Some(multiplier) = self.risk_multiplier {
            anyhow::ensure!(multiplier > 0.0, "risk_multiplier must be positive");
        }
        Ok(())
    }
}

/// Which sleeve a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sleeve {
    Core,
    Trading,
}

impl std::fmt::Display for Sleeve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sleeve::Core => write!(f, "core"),
            Sleeve::Trading => write!(f, "trading"),
        }
    }
}

/// Fixed buy-and-hold sleeve.
#[derive(Debug, Clone, Default)]
pub struct CoreHoldings {
    profiles: BTreeMap<String, SymbolProfile>,
}

impl CoreHoldings {
    pub fn new(profiles: BTreeMap<String, SymbolProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|(symbol, profile)| (symbol.to_uppercase(), profile))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolProfile> {
        self.profiles.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolProfile)> {
        self.profiles.iter().map(|(s, p)| (s.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Share of capital the core targets at unit conviction.
    pub fn total_allocation(&self) -> Decimal {
        self.profiles.values().map(|p| p.target_allocation).sum()
    }
}

/// Selection pool: symbol -> sector.
#[derive(Debug, Clone, Default)]
pub struct CandidateUniverse {
    sectors: BTreeMap<String, String>,
}

impl CandidateUniverse {
    pub fn new(sectors: BTreeMap<String, String>) -> Self {
        Self {
            sectors: sectors
                .into_iter()
                .map(|(symbol, sector)| (symbol.to_uppercase(), sector))
                .collect(),
        }
    }

    pub fn sector_of(&self, symbol: &str) -> Option<&str> {
        self.sectors.get(symbol).map(String::as_str)
    }

    /// Number of universe members in `sector`.
    pub fn sector_size(&self, sector: &str) -> usize {
        self.sectors.values().filter(|s| s.as_str() == sector).count()
    }

    /// Symbols in ascending order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.sectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

/// Dynamically selected sleeve. Every member carries the same standard
/// profile, tagged with its own sector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradingSleeve {
    profiles: BTreeMap<String, SymbolProfile>,
}

impl TradingSleeve {
    /// Build a sleeve from `(symbol, sector)` picks.
    pub fn from_selection<'a>(
        picks: impl IntoIterator<Item = (&'a str, &'a str)>,
        template: &SymbolProfile,
    ) -> Self {
        let profiles = picks
            .into_iter()
            .map(|(symbol, sector)| {
                let mut profile = template.clone();
                profile.sector = sector.to_string();
                (symbol.to_string(), profile)
            })
            .collect();
        Self { profiles }
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolProfile> {
        self.profiles.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.profiles.contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolProfile)> {
        self.profiles.iter().map(|(s, p)| (s.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Everything the engine needs to resolve a symbol's profile.
#[derive(Debug)]
pub struct PortfolioConfig {
    core: CoreHoldings,
    universe: CandidateUniverse,
    sleeve_profile: SymbolProfile,
    sleeve: RwLock<Arc<TradingSleeve>>,
}

impl PortfolioConfig {
    /// Start with an empty trading sleeve.
    pub fn new(
        core: CoreHoldings,
        universe: CandidateUniverse,
        sleeve_profile: SymbolProfile,
    ) -> Self {
        Self {
            core,
            universe,
            sleeve_profile,
            sleeve: RwLock::new(Arc::new(TradingSleeve::default())),
        }
    }

    pub fn from_settings(settings: &PortfolioSettings) -> Self {
        Self::new(
            CoreHoldings::new(settings.core.clone()),
            CandidateUniverse::new(settings.candidates.clone()),
            settings.sleeve_profile.clone(),
        )
    }

    pub fn core(&self) -> &CoreHoldings {
        &self.core
    }

    pub fn universe(&self) -> &CandidateUniverse {
        &self.universe
    }

    pub fn sleeve_profile(&self) -> &SymbolProfile {
        &self.sleeve_profile
    }

    /// Snapshot of the current trading sleeve.
    pub async fn sleeve(&self) -> Arc<TradingSleeve> {
        self.sleeve.read().await.clone()
    }

    /// Replace the trading sleeve; returns the previous one.
    pub async fn replace_sleeve(&self, next: TradingSleeve) -> Arc<TradingSleeve> {
        let next = Arc::new(next);
        let previous = {
            let mut guard = self.sleeve.write().await;
            std::mem::replace(&mut *guard, next.clone())
        };
        info!(
            previous = ?previous.symbols(),
            current = ?next.symbols(),
            "Trading sleeve replaced"
        );
        previous
    }

    /// Profile for `symbol`: core first, then the current trading sleeve.
    pub async fn profile_for(&self, symbol: &str) -> Option<(Sleeve, SymbolProfile)> {
        if let Some(profile) = self.core.get(symbol) {
            return Some((Sleeve::Core, profile.clone()));
        }
        self.sleeve
            .read()
            .await
            .get(symbol)
            .map(|profile| (Sleeve::Trading, profile.clone()))
    }

    /// Symbols the price feed must carry: core plus every candidate, so
    /// sleeve changes never require a resubscription.
    pub fn stream_symbols(&self) -> Vec<String> {
        self.core
            .symbols()
            .chain(self.universe.symbols())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn profile(allocation: Decimal) -> SymbolProfile {
        SymbolProfile::new("energy", allocation, 0.6, 0.4, dec!(0.10), dec!(0.20))
    }

    fn portfolio() -> PortfolioConfig {
        let core = CoreHoldings::new(BTreeMap::from([
            ("YPF".to_string(), profile(dec!(0.35))),
            ("PAM".to_string(), profile(dec!(0.07))),
        ]));
        let universe = CandidateUniverse::new(BTreeMap::from([
            ("GGAL".to_string(), "banking".to_string()),
            ("BMA".to_string(), "banking".to_string()),
            ("GLOB".to_string(), "technology".to_string()),
            ("PAM".to_string(), "energy".to_string()),
        ]));
        let template =
            SymbolProfile::new("trading", dec!(0.08), 0.5, 0.5, dec!(0.08), dec!(0.15));
        PortfolioConfig::new(core, universe, template)
    }

    #[test]
    fn test_profile_validation() {
        assert!(profile(dec!(0.35)).validate().is_ok());
        assert!(profile(Decimal::ZERO).validate().is_err());
        assert!(profile(dec!(1.01)).validate().is_err());

        let mut negative = profile(dec!(0.1));
        negative.momentum_weight = -0.1;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_universe_sector_sizes() {
        let portfolio = portfolio();
        assert_eq!(portfolio.universe().sector_size("banking"), 2);
        assert_eq!(portfolio.universe().sector_size("technology"), 1);
        assert_eq!(portfolio.universe().sector_size("consumer"), 0);
    }

    #[test]
    fn test_stream_symbols_are_deduplicated_union() {
        let portfolio = portfolio();
        assert_eq!(
            portfolio.stream_symbols(),
            vec!["BMA", "GGAL", "GLOB", "PAM", "YPF"]
        );
    }

    #[tokio::test]
    async fn test_sleeve_starts_empty_and_is_replaced_wholesale() {
        let portfolio = portfolio();
        assert!(portfolio.sleeve().await.is_empty());
        assert!(portfolio.profile_for("GGAL").await.is_none());

        let first = TradingSleeve::from_selection(
            [("GGAL", "banking"), ("GLOB", "technology")],
            portfolio.sleeve_profile(),
        );
        portfolio.replace_sleeve(first).await;

        let (sleeve, ggal) = portfolio.profile_for("GGAL").await.unwrap();
        assert_eq!(sleeve, Sleeve::Trading);
        assert_eq!(ggal.sector, "banking");
        assert_eq!(ggal.target_allocation, dec!(0.08));

        let held = portfolio.sleeve().await;
        let second = TradingSleeve::from_selection([("BMA", "banking")], portfolio.sleeve_profile());
        let previous = portfolio.replace_sleeve(second).await;

        // Old snapshot is untouched by the swap
        assert_eq!(held.len(), 2);
        assert_eq!(*previous, *held);
        assert!(portfolio.profile_for("GGAL").await.is_none());
        assert!(portfolio.profile_for("BMA").await.is_some());
    }

    #[tokio::test]
    async fn test_core_takes_precedence_over_sleeve() {
        let portfolio = portfolio();
        let sleeve = TradingSleeve::from_selection([("PAM", "energy")], portfolio.sleeve_profile());
        portfolio.replace_sleeve(sleeve).await;

        let (kind, pam) = portfolio.profile_for("PAM").await.unwrap();
        assert_eq!(kind, Sleeve::Core);
        assert_eq!(pam.target_allocation, dec!(0.07));
    }

    #[test]
    fn test_core_total_allocation() {
        let portfolio = portfolio();
        assert_eq!(portfolio.core().total_allocation(), dec!(0.42));
    }
}
