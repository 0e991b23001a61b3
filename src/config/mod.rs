//! Configuration management for the MERVAL strategy.
//!
//! Loads settings from an optional `config.*` file and environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::portfolio::SymbolProfile;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Alpaca credentials and endpoints
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Capital base and lot precision
    #[serde(default)]
    pub capital: CapitalConfig,
    /// Signal windows and sizing parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Trading sleeve selection criteria
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Core holdings and candidate universe
    #[serde(default)]
    pub portfolio: PortfolioSettings,
    /// Process-level settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// API key id (falls back to `APCA_API_KEY_ID`)
    #[serde(default)]
    pub api_key: String,
    /// API secret (falls back to `APCA_API_SECRET_KEY`)
    #[serde(default)]
    pub secret_key: String,
    /// Use the paper trading endpoint for account calls
    #[serde(default = "default_paper")]
    pub paper: bool,
    /// Market data feed ("iex" or "sip")
    #[serde(default = "default_data_feed")]
    pub data_feed: String,
    /// Override for the trading API base URL
    #[serde(default)]
    pub trading_url: Option<String>,
    /// Override for the market data API base URL
    #[serde(default)]
    pub data_url: Option<String>,
    /// Override for the quote stream URL
    #[serde(default)]
    pub stream_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Capital the allocations are fractions of, in USD
    #[serde(default = "default_initial_investment")]
    pub initial_investment: Decimal,
    /// Decimal places allowed in order quantities (0 = whole shares)
    #[serde(default)]
    pub quantity_precision: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Rolling window of the momentum mean, in bars
    #[serde(default = "default_momentum_window")]
    pub momentum_window: usize,
    /// Rolling window of return volatility, in bars
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
    /// Rolling window of the z-score, in bars
    #[serde(default = "default_mean_rev_window")]
    pub mean_rev_window: usize,
    /// Smallest lag of the Hurst regression
    #[serde(default = "default_hurst_min_lag")]
    pub hurst_min_lag: usize,
    /// Largest lag of the Hurst regression (inclusive)
    #[serde(default = "default_hurst_max_lag")]
    pub hurst_max_lag: usize,
    /// Raw momentum above which a profile's risk multiplier applies
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold: f64,
    /// Cap on signal conviction as a multiple of the base allocation
    #[serde(default = "default_max_position_increase")]
    pub max_position_increase: Decimal,
    /// Minimum relative deviation from target before an order is sent
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,
    /// Calendar days of hourly bars fed to the signal on each tick
    #[serde(default = "default_signal_lookback_days")]
    pub signal_lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Minimum dollar volume proxy (mean volume * mean close)
    #[serde(default = "default_min_daily_volume")]
    pub min_daily_volume: Decimal,
    /// Maximum relative bid-ask spread (exclusive)
    #[serde(default = "default_max_spread")]
    pub max_spread: Decimal,
    /// Trading sleeve size
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
    /// Days of bars for the liquidity gate
    #[serde(default = "default_liquidity_lookback_days")]
    pub liquidity_lookback_days: u32,
    /// Days of bars for scoring
    #[serde(default = "default_scoring_lookback_days")]
    pub scoring_lookback_days: u32,
    /// Seconds between selection passes
    #[serde(default = "default_selection_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_momentum_score_weight")]
    pub momentum_score_weight: f64,
    #[serde(default = "default_trend_score_weight")]
    pub trend_score_weight: f64,
    #[serde(default = "default_inverse_vol_score_weight")]
    pub inverse_vol_score_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSettings {
    /// Buy-and-hold core, symbol -> profile
    #[serde(default = "default_core")]
    pub core: BTreeMap<String, SymbolProfile>,
    /// Selection pool, symbol -> sector
    #[serde(default = "default_candidates")]
    pub candidates: BTreeMap<String, String>,
    /// Profile given to every trading sleeve member
    #[serde(default = "default_sleeve_profile")]
    pub sleeve_profile: SymbolProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// SQLite file for paper state and the event journal
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Seconds between performance summaries
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    /// Seconds between paper state snapshots
    #[serde(default = "default_state_save_interval")]
    pub state_save_interval_secs: u64,
}

// Default value functions
fn default_paper() -> bool {
    true
}

fn default_data_feed() -> String {
    "iex".to_string()
}

fn default_initial_investment() -> Decimal {
    Decimal::new(13_000, 0)
}

fn default_momentum_window() -> usize {
    20
}

fn default_volatility_window() -> usize {
    10
}

fn default_mean_rev_window() -> usize {
    5
}

fn default_hurst_min_lag() -> usize {
    2
}

fn default_hurst_max_lag() -> usize {
    20
}

fn default_momentum_threshold() -> f64 {
    0.02
}

fn default_max_position_increase() -> Decimal {
    Decimal::new(15, 1) // 1.5x base allocation
}

fn default_rebalance_threshold() -> Decimal {
    Decimal::new(10, 2) // 10% deviation
}

fn default_signal_lookback_days() -> u32 {
    30
}

fn default_min_daily_volume() -> Decimal {
    Decimal::new(500_000, 0) // $500k
}

fn default_max_spread() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_max_selected() -> usize {
    3
}

fn default_liquidity_lookback_days() -> u32 {
    5
}

fn default_scoring_lookback_days() -> u32 {
    30
}

fn default_selection_interval() -> u64 {
    86_400 // daily
}

fn default_momentum_score_weight() -> f64 {
    0.4
}

fn default_trend_score_weight() -> f64 {
    0.3
}

fn default_inverse_vol_score_weight() -> f64 {
    0.3
}

fn default_core() -> BTreeMap<String, SymbolProfile> {
    let ypf = SymbolProfile::new(
        "energy",
        Decimal::new(35, 2),
        0.8,
        0.2,
        Decimal::new(15, 2),
        Decimal::new(30, 2),
    )
    .with_risk_multiplier(1.2, None);

    BTreeMap::from([
        ("YPF".to_string(), ypf),
        (
            "BBVA".to_string(),
            SymbolProfile::new("banking", Decimal::new(25, 2), 0.7, 0.3, Decimal::new(12, 2), Decimal::new(25, 2)),
        ),
        (
            "CRESY".to_string(),
            SymbolProfile::new("agriculture", Decimal::new(8, 2), 0.6, 0.4, Decimal::new(10, 2), Decimal::new(20, 2)),
        ),
        (
            "PAM".to_string(),
            SymbolProfile::new("energy", Decimal::new(7, 2), 0.6, 0.4, Decimal::new(10, 2), Decimal::new(20, 2)),
        ),
    ])
}

fn default_candidates() -> BTreeMap<String, String> {
    [
        ("GGAL", "banking"),
        ("BMA", "banking"),
        ("SUPV", "banking"),
        ("BBAR", "banking"),
        ("TEO", "technology"),
        ("GLOB", "technology"),
        ("CEPU", "energy"),
        ("EDN", "energy"),
        ("TGS", "energy"),
        ("AGRO", "agriculture"),
        ("IRCP", "real_estate"),
        ("IRS", "real_estate"),
        ("LOMA", "industrial"),
        ("TS", "industrial"),
        ("ARCO", "consumer"),
        ("MELI", "consumer"),
    ]
    .into_iter()
    .map(|(symbol, sector)| (symbol.to_string(), sector.to_string()))
    .collect()
}

fn default_sleeve_profile() -> SymbolProfile {
    // Sector is replaced by the candidate's own sector on selection
    SymbolProfile::new("trading", Decimal::new(8, 2), 0.5, 0.5, Decimal::new(8, 2), Decimal::new(15, 2))
}

fn default_database_path() -> String {
    "data/merval_state.db".to_string()
}

fn default_status_interval() -> u64 {
    3600
}

fn default_state_save_interval() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MERVAL"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if config.broker.api_key.is_empty() {
            config.broker.api_key = std::env::var("APCA_API_KEY_ID").unwrap_or_default();
        }
        if config.broker.secret_key.is_empty() {
            config.broker.secret_key = std::env::var("APCA_API_SECRET_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.capital.initial_investment > Decimal::ZERO,
            "initial_investment must be positive"
        );

        for (symbol, profile) in &self.portfolio.core {
            profile
                .validate()
                .with_context(|| format!("invalid profile for {symbol}"))?;
        }
        self.portfolio
            .sleeve_profile
            .validate()
            .context("invalid sleeve_profile")?;

        let s = &self.strategy;
        anyhow::ensure!(
            s.momentum_window >= 2 && s.volatility_window >= 2 && s.mean_rev_window >= 2,
            "signal windows must be at least 2 bars"
        );
        anyhow::ensure!(
            s.hurst_min_lag >= 2 && s.hurst_min_lag < s.hurst_max_lag,
            "hurst lags must satisfy 2 <= hurst_min_lag < hurst_max_lag"
        );
        anyhow::ensure!(
            s.max_position_increase > Decimal::ZERO,
            "max_position_increase must be positive"
        );
        anyhow::ensure!(
            s.rebalance_threshold >= Decimal::ZERO,
            "rebalance_threshold must not be negative"
        );

        let sel = &self.selection;
        anyhow::ensure!(
            sel.momentum_score_weight >= 0.0
                && sel.trend_score_weight >= 0.0
                && sel.inverse_vol_score_weight >= 0.0,
            "selection score weights must not be negative"
        );
        anyhow::ensure!(sel.interval_secs > 0, "selection interval must be positive");

        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            paper: default_paper(),
            data_feed: default_data_feed(),
            trading_url: None,
            data_url: None,
            stream_url: None,
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            initial_investment: default_initial_investment(),
            quantity_precision: 0,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            momentum_window: default_momentum_window(),
            volatility_window: default_volatility_window(),
            mean_rev_window: default_mean_rev_window(),
            hurst_min_lag: default_hurst_min_lag(),
            hurst_max_lag: default_hurst_max_lag(),
            momentum_threshold: default_momentum_threshold(),
            max_position_increase: default_max_position_increase(),
            rebalance_threshold: default_rebalance_threshold(),
            signal_lookback_days: default_signal_lookback_days(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_daily_volume: default_min_daily_volume(),
            max_spread: default_max_spread(),
            max_selected: default_max_selected(),
            liquidity_lookback_days: default_liquidity_lookback_days(),
            scoring_lookback_days: default_scoring_lookback_days(),
            interval_secs: default_selection_interval(),
            momentum_score_weight: default_momentum_score_weight(),
            trend_score_weight: default_trend_score_weight(),
            inverse_vol_score_weight: default_inverse_vol_score_weight(),
        }
    }
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            core: default_core(),
            candidates: default_candidates(),
            sleeve_profile: default_sleeve_profile(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            status_interval_secs: default_status_interval(),
            state_save_interval_secs: default_state_save_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_core_matches_research_allocations() {
        let core = default_core();
        assert_eq!(core.len(), 4);
        assert_eq!(core["YPF"].target_allocation, dec!(0.35));
        assert_eq!(core["YPF"].risk_multiplier, Some(1.2));
        assert_eq!(core["BBVA"].stop_loss, dec!(0.12));
        assert!(core["PAM"].risk_multiplier.is_none());

        let total: Decimal = core.values().map(|p| p.target_allocation).sum();
        assert_eq!(total, dec!(0.75));
    }

    #[test]
    fn test_default_universe_has_sixteen_candidates() {
        let candidates = default_candidates();
        assert_eq!(candidates.len(), 16);
        assert_eq!(candidates["GLOB"], "technology");
    }

    #[test]
    fn test_invalid_lags_rejected() {
        let mut config = Config::default();
        config.strategy.hurst_min_lag = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_stop_loss_rejected() {
        let mut config = Config::default();
        if let Some(profile) = config.portfolio.core.get_mut("CRESY") {
            profile.stop_loss = Decimal::ZERO;
        }
        assert!(config.validate().is_err());
    }
}
