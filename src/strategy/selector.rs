//! Trading sleeve selection.
//!
//! Every candidate passes a liquidity gate (dollar volume and spread), is
//! scored on risk-adjusted momentum, trend strength and inverse
//! volatility, and the best scores are taken greedily under a
//! one-per-sector rule.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::analysis::{MomentumReading, SignalBlender, SignalError, NEUTRAL_HURST};
use crate::broker::{BrokerError, MarketDataProvider};
use crate::config::SelectionConfig;
use crate::events::{EventSink, StrategyEvent};
use crate::portfolio::{CandidateUniverse, PortfolioConfig, SymbolProfile, TradingSleeve};

/// Reasons for dropping a candidate during a selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    DataUnavailable,
    LowVolume,
    WideSpread,
    InsufficientHistory,
    ZeroVolatility,
}

/// A candidate that survived the liquidity gate, with its score inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub symbol: String,
    pub sector: String,
    pub momentum: MomentumReading,
    pub hurst: f64,
    pub score: f64,
}

/// Outcome of one selection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub sleeve: TradingSleeve,
    /// Accepted candidates in acceptance order
    pub picks: Vec<ScoredCandidate>,
    /// Every scored candidate, best first
    pub ranked: Vec<ScoredCandidate>,
}

pub struct CandidateSelector {
    config: SelectionConfig,
    signals: SignalBlender,
}

impl CandidateSelector {
    pub fn new(config: SelectionConfig, signals: SignalBlender) -> Self {
        Self { config, signals }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Score a price series. `Ok(None)` when volatility is zero and the
    /// score is undefined.
    pub fn score(
        &self,
        symbol: &str,
        sector: &str,
        prices: &[f64],
    ) -> Result<Option<ScoredCandidate>, SignalError> {
        let momentum = self.signals.momentum().compute(prices)?;
        if !momentum.has_volatility() {
            return Ok(None);
        }
        let hurst = self.signals.hurst_or_neutral(prices)?;

        let score = self.config.momentum_score_weight * (momentum.raw / momentum.volatility)
            + self.config.trend_score_weight * (hurst - NEUTRAL_HURST)
            + self.config.inverse_vol_score_weight * (1.0 / momentum.volatility);

        Ok(Some(ScoredCandidate {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            momentum,
            hurst,
            score,
        }))
    }

    /// Sort by score descending; equal scores fall back to symbol order so
    /// identical inputs always rank identically.
    pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        candidates
    }

    /// Greedy top-N under the sector rule: a sector already represented is
    /// only accepted again when it has a single member in the universe.
    pub fn pick_diversified<'a>(
        &self,
        ranked: &'a [ScoredCandidate],
        universe: &CandidateUniverse,
    ) -> Vec<&'a ScoredCandidate> {
        let mut sectors: HashSet<&str> = HashSet::new();
        let mut picks = Vec::with_capacity(self.config.max_selected);

        for candidate in ranked {
            if picks.len() >= self.config.max_selected {
                break;
            }
            let sector = candidate.sector.as_str();
            if sectors.contains(sector) && universe.sector_size(sector) > 1 {
                debug!(symbol = %candidate.symbol, %sector, "Sector already represented");
                continue;
            }
            sectors.insert(sector);
            picks.push(candidate);
        }
        picks
    }

    /// Run one full pass over `universe`. Per-symbol failures only exclude
    /// that symbol.
    #[instrument(skip_all, fields(candidates = universe.len()))]
    pub async fn select(
        &self,
        universe: &CandidateUniverse,
        template: &SymbolProfile,
        data: &dyn MarketDataProvider,
    ) -> Selection {
        let evaluations = universe.symbols().map(|symbol| async move {
            let sector = universe.sector_of(symbol).unwrap_or_default();
            (symbol, self.evaluate(symbol, sector, data).await)
        });
        let results = join_all(evaluations).await;

        let mut rejected_data = 0usize;
        let mut rejected_volume = 0usize;
        let mut rejected_spread = 0usize;
        let mut rejected_history = 0usize;
        let mut rejected_volatility = 0usize;

        let mut scored = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(candidate) => scored.push(candidate),
                Err(reason) => {
                    debug!(%symbol, ?reason, "Candidate rejected");
                    match reason {
                        RejectReason::DataUnavailable => rejected_data += 1,
                        RejectReason::LowVolume => rejected_volume += 1,
                        RejectReason::WideSpread => rejected_spread += 1,
                        RejectReason::InsufficientHistory => rejected_history += 1,
                        RejectReason::ZeroVolatility => rejected_volatility += 1,
                    }
                }
            }
        }

        let ranked = Self::rank(scored);
        let picks: Vec<ScoredCandidate> = self
            .pick_diversified(&ranked, universe)
            .into_iter()
            .cloned()
            .collect();
        let sleeve = TradingSleeve::from_selection(
            picks.iter().map(|c| (c.symbol.as_str(), c.sector.as_str())),
            template,
        );

        info!(
            scored = ranked.len(),
            selected = ?sleeve.symbols(),
            rejected_data,
            rejected_volume,
            rejected_spread,
            rejected_history,
            rejected_volatility,
            "Candidate selection complete"
        );

        Selection {
            sleeve,
            picks,
            ranked,
        }
    }

    /// Select, swap the portfolio's sleeve and emit one `select` event per
    /// member. Returns the new sleeve.
    pub async fn refresh(
        &self,
        portfolio: &PortfolioConfig,
        data: &dyn MarketDataProvider,
        events: &dyn EventSink,
    ) -> Arc<TradingSleeve> {
        let selection = self
            .select(portfolio.universe(), portfolio.sleeve_profile(), data)
            .await;
        for pick in &selection.picks {
            events.emit(&StrategyEvent::select(&pick.symbol, &pick.sector));
        }
        portfolio.replace_sleeve(selection.sleeve).await;
        portfolio.sleeve().await
    }

    async fn evaluate(
        &self,
        symbol: &str,
        sector: &str,
        data: &dyn MarketDataProvider,
    ) -> Result<ScoredCandidate, RejectReason> {
        self.check_liquidity(symbol, data).await?;

        let series = data
            .get_bars(symbol, self.config.scoring_lookback_days)
            .await
            .map_err(|e| data_unavailable(symbol, &e))?;

        match self.score(symbol, sector, &series.closes()) {
            Ok(Some(candidate)) => Ok(candidate),
            Ok(None) => Err(RejectReason::ZeroVolatility),
            Err(e) => {
                warn!(%symbol, error = %e, "Cannot score candidate");
                Err(RejectReason::InsufficientHistory)
            }
        }
    }

    async fn check_liquidity(
        &self,
        symbol: &str,
        data: &dyn MarketDataProvider,
    ) -> Result<(), RejectReason> {
        let series = data
            .get_bars(symbol, self.config.liquidity_lookback_days)
            .await
            .map_err(|e| data_unavailable(symbol, &e))?;

        let (Some(volume), Some(close)) = (series.mean_volume(), series.mean_close()) else {
            warn!(%symbol, "No bars in liquidity window");
            return Err(RejectReason::DataUnavailable);
        };
        let dollar_volume = volume * close;
        if dollar_volume <= self.config.min_daily_volume {
            debug!(%symbol, %dollar_volume, "Below minimum dollar volume");
            return Err(RejectReason::LowVolume);
        }

        let quote = data
            .get_latest_quote(symbol)
            .await
            .map_err(|e| data_unavailable(symbol, &e))?;
        match quote.spread() {
            Some(spread) if spread < self.config.max_spread => Ok(()),
            spread => {
                debug!(%symbol, ?spread, max = %self.config.max_spread, "Spread too wide");
                Err(RejectReason::WideSpread)
            }
        }
    }
}

fn data_unavailable(symbol: &str, error: &BrokerError) -> RejectReason {
    warn!(%symbol, %error, "Candidate data unavailable");
    RejectReason::DataUnavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockMarketDataProvider, PaperBroker, Quote};
    use crate::events::{EventKind, RecordingEventSink};
    use crate::strategy::testing::{hourly_series, zigzag};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn template() -> SymbolProfile {
        SymbolProfile::new("trading", dec!(0.08), 0.5, 0.5, dec!(0.08), dec!(0.15))
    }

    fn selector() -> CandidateSelector {
        CandidateSelector::new(SelectionConfig::default(), SignalBlender::default())
    }

    fn candidate(symbol: &str, sector: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            momentum: MomentumReading {
                raw: 0.01,
                volatility: 0.2,
                risk_adjusted: 0.05,
            },
            hurst: 0.5,
            score,
        }
    }

    fn universe(pairs: &[(&str, &str)]) -> CandidateUniverse {
        CandidateUniverse::new(
            pairs
                .iter()
                .map(|(s, sector)| (s.to_string(), sector.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    async fn load(broker: &PaperBroker, symbol: &str, drift: f64, volume: Decimal) {
        let closes = zigzag(20.0, drift, 0.004, 200);
        broker.set_bars(hourly_series(symbol, &closes, volume)).await;
        broker
            .set_quote(
                symbol,
                Quote {
                    bid: dec!(19.9),
                    ask: dec!(20),
                },
            )
            .await;
    }

    #[test]
    fn test_sector_diversity() {
        let universe = universe(&[
            ("BMA", "banking"),
            ("GGAL", "banking"),
            ("TGS", "energy"),
            ("EDN", "energy"),
            ("CRESY", "agriculture"),
        ]);
        let ranked = CandidateSelector::rank(vec![
            candidate("BMA", "banking", 0.9),
            candidate("GGAL", "banking", 0.8),
            candidate("TGS", "energy", 0.7),
            candidate("EDN", "energy", 0.6),
            candidate("CRESY", "agriculture", 0.5),
        ]);

        let picks: Vec<&str> = selector()
            .pick_diversified(&ranked, &universe)
            .iter()
            .map(|c| c.symbol.as_str())
            .collect();
        assert_eq!(picks, vec!["BMA", "TGS", "CRESY"]);
    }

    #[test]
    fn test_selection_stops_at_max() {
        let universe = universe(&[
            ("A", "one"),
            ("B", "two"),
            ("C", "three"),
            ("D", "four"),
        ]);
        let ranked = CandidateSelector::rank(vec![
            candidate("A", "one", 0.4),
            candidate("B", "two", 0.3),
            candidate("C", "three", 0.2),
            candidate("D", "four", 0.1),
        ]);
        assert_eq!(selector().pick_diversified(&ranked, &universe).len(), 3);
    }

    #[test]
    fn test_rank_breaks_ties_by_symbol() {
        let ranked = CandidateSelector::rank(vec![
            candidate("TGS", "energy", 0.5),
            candidate("BMA", "banking", 0.5),
            candidate("GLOB", "technology", 0.9),
        ]);
        let order: Vec<&str> = ranked.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(order, vec!["GLOB", "BMA", "TGS"]);
    }

    #[test]
    fn test_score_formula() {
        let selector = selector();
        let closes = zigzag(20.0, 0.002, 0.004, 100);
        let c = selector.score("TGS", "energy", &closes).unwrap().unwrap();
        let expected = 0.4 * (c.momentum.raw / c.momentum.volatility)
            + 0.3 * (c.hurst - 0.5)
            + 0.3 * (1.0 / c.momentum.volatility);
        assert!((c.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_flat_series_is_excluded() {
        let closes = vec![20.0; 60];
        assert!(selector().score("TGS", "energy", &closes).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_liquidity_gate() {
        let broker = PaperBroker::new(dec!(13000));
        load(&broker, "GGAL", 0.001, dec!(50000)).await;
        load(&broker, "SUPV", 0.003, dec!(10)).await;
        load(&broker, "LOMA", 0.002, dec!(50000)).await;
        broker
            .set_quote(
                "LOMA",
                Quote {
                    bid: dec!(19),
                    ask: dec!(20),
                },
            )
            .await;

        let universe = universe(&[
            ("GGAL", "banking"),
            ("SUPV", "banking"),
            ("LOMA", "materials"),
        ]);
        let selection = selector().select(&universe, &template(), &broker).await;
        assert_eq!(selection.sleeve.symbols(), vec!["GGAL".to_string()]);
        assert_eq!(selection.ranked.len(), 1);
    }

    #[tokio::test]
    async fn test_selection_is_idempotent() {
        let broker = PaperBroker::new(dec!(13000));
        load(&broker, "GGAL", 0.001, dec!(50000)).await;
        load(&broker, "BMA", 0.002, dec!(50000)).await;
        load(&broker, "TGS", 0.003, dec!(50000)).await;
        load(&broker, "GLOB", 0.0015, dec!(50000)).await;

        let universe = universe(&[
            ("GGAL", "banking"),
            ("BMA", "banking"),
            ("TGS", "energy"),
            ("GLOB", "technology"),
        ]);
        let selector = selector();
        let first = selector.select(&universe, &template(), &broker).await;
        let second = selector.select(&universe, &template(), &broker).await;

        assert_eq!(first, second);
        assert_eq!(first.sleeve.len(), 3);
        let banking = first
            .sleeve
            .iter()
            .filter(|(_, p)| p.sector == "banking")
            .count();
        assert_eq!(banking, 1);
        for (_, profile) in first.sleeve.iter() {
            assert_eq!(profile.target_allocation, dec!(0.08));
            assert_eq!(profile.stop_loss, dec!(0.08));
        }
    }

    #[tokio::test]
    async fn test_data_errors_only_exclude_that_symbol() {
        let closes = zigzag(20.0, 0.002, 0.004, 200);
        let series = hourly_series("TGS", &closes, dec!(50000));

        let mut data = MockMarketDataProvider::new();
        data.expect_get_bars().returning(move |symbol, _| {
            if symbol == "EDN" {
                Err(BrokerError::data_unavailable(symbol, "timeout"))
            } else {
                Ok(series.clone())
            }
        });
        data.expect_get_latest_quote().returning(|_| {
            Ok(Quote {
                bid: dec!(19.9),
                ask: dec!(20),
            })
        });

        let universe = universe(&[("EDN", "energy"), ("TGS", "energy")]);
        let selection = selector().select(&universe, &template(), &data).await;
        assert_eq!(selection.sleeve.symbols(), vec!["TGS".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_swaps_sleeve_and_emits_events() {
        let broker = PaperBroker::new(dec!(13000));
        load(&broker, "TGS", 0.002, dec!(50000)).await;

        let portfolio = PortfolioConfig::new(
            crate::portfolio::CoreHoldings::new(BTreeMap::new()),
            universe(&[("TGS", "energy")]),
            template(),
        );
        let sink = RecordingEventSink::default();

        let sleeve = selector().refresh(&portfolio, &broker, &sink).await;
        assert!(sleeve.contains("TGS"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Select);
        assert_eq!(events[0].reason.as_deref(), Some("energy"));
    }
}
