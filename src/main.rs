//! Merval Trader - Main Entry Point
//!
//! Paper trading by default; live order routing behind `--live` or
//! `LIVE_TRADING=true`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use merval_trader::analysis::SignalBlender;
use merval_trader::broker::{
    AlpacaClient, AlpacaQuoteStream, Brokerage, MarketDataProvider, PaperBroker, PriceFeed,
};
use merval_trader::config::Config;
use merval_trader::events::EventSink;
use merval_trader::persistence::{JournalEventSink, PersistenceManager};
use merval_trader::portfolio::PortfolioConfig;
use merval_trader::risk::PositionSizer;
use merval_trader::strategy::{CandidateSelector, TradingEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Merval Trader CLI
#[derive(Parser)]
#[command(name = "merval-trader")]
#[command(version, about = "Momentum / mean-reversion strategy for Argentine ADRs on Alpaca")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop (default)
    Run {
        /// Route orders to Alpaca instead of the local paper broker
        #[arg(long)]
        live: bool,
    },

    /// Run one candidate selection pass and print the trading sleeve
    Select,

    /// Print the blended signal breakdown for a symbol
    Signal {
        #[arg(short, long)]
        symbol: String,
    },

    /// Show persisted paper account state and recent strategy events
    Status {
        /// Path to SQLite database (default: data/merval_state.db)
        #[arg(short, long, default_value = "data/merval_state.db")]
        db: String,

        /// Number of recent events to show
        #[arg(short, long, default_value = "20")]
        events: usize,
    },
}

/// Trading mode: Live (real money) or Paper (local simulation).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Select) => run_select().await,
        Some(Commands::Signal { symbol }) => run_signal(&symbol).await,
        Some(Commands::Status { db, events }) => show_status(&db, events),
        Some(Commands::Run { live }) => run_trading(live).await,
        None => run_trading(false).await,
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_trading(live_flag: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Merval Trader v{} - Momentum Engine            ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let mut config = load_config()?;

    let trading_mode =
        if live_flag || std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
            warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
            config.broker.paper = false;
            TradingMode::Live
        } else {
            info!("📝 Paper trading mode - orders are simulated locally");
            TradingMode::Paper
        };

    log_config(&config);

    if config.broker.api_key.is_empty() {
        warn!("No Alpaca API key configured; market data requests will be rejected");
    }

    let alpaca = Arc::new(AlpacaClient::new(&config.broker)?);
    let feed = Arc::new(AlpacaQuoteStream::new(&config.broker));
    let journal = Arc::new(JournalEventSink::new(
        PersistenceManager::new(&config.runtime.database_path)
            .context("Failed to initialize persistence database")?,
    ));
    let portfolio = Arc::new(PortfolioConfig::from_settings(&config.portfolio));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let paper = match trading_mode {
        TradingMode::Paper => Some(restore_paper_broker(&config, &journal).await),
        TradingMode::Live => None,
    };
    let broker: Arc<dyn Brokerage> = match &paper {
        Some(paper) => paper.clone(),
        None => alpaca.clone(),
    };

    let saver = paper
        .clone()
        .map(|paper| spawn_state_saver(&config, paper, journal.clone(), shutdown.clone()));

    let engine = TradingEngine::new(
        &config,
        portfolio,
        alpaca as Arc<dyn MarketDataProvider>,
        broker,
        feed as Arc<dyn PriceFeed>,
        journal.clone() as Arc<dyn EventSink>,
    );

    info!("🚀 Starting trading loop...");
    let result = engine.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(saver) = saver {
        saver.await.ok();
    }
    if let Some(paper) = &paper {
        info!("💾 [PERSISTENCE] Saving final state before shutdown...");
        save_paper_state(paper, &journal).await;
    }

    match result {
        Ok(()) => {
            info!("👋 Merval Trader shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Trading loop terminated");
            Err(e.into())
        }
    }
}

/// Paper broker seeded from the journal, or fresh with the configured capital.
async fn restore_paper_broker(config: &Config, journal: &JournalEventSink) -> Arc<PaperBroker> {
    let paper = Arc::new(PaperBroker::new(config.capital.initial_investment));
    match journal.with_manager(|m| m.load_state()) {
        Ok(Some(state)) => {
            info!(
                cash = %state.cash,
                positions = state.positions.len(),
                realized_pnl = %state.realized_pnl,
                "📂 [PERSISTENCE] Restoring paper account"
            );
            paper.restore_state(state).await;
        }
        Ok(None) => info!(
            capital = %config.capital.initial_investment,
            "📂 [PERSISTENCE] No previous state found, starting fresh"
        ),
        Err(e) => warn!(error = %e, "Failed to load paper state, starting fresh"),
    }
    paper
}

fn spawn_state_saver(
    config: &Config,
    paper: Arc<PaperBroker>,
    journal: Arc<JournalEventSink>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(config.runtime.state_save_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => save_paper_state(&paper, &journal).await,
            }
        }
    })
}

async fn save_paper_state(paper: &PaperBroker, journal: &JournalEventSink) {
    let state = paper.export_state().await;
    match journal.with_manager(|m| m.save_state(&state)) {
        Ok(()) => info!(
            equity = %state.equity(),
            positions = state.positions.len(),
            "💾 [PERSISTENCE] Paper state saved"
        ),
        Err(e) => error!(error = %e, "Failed to save paper state"),
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        info!("🛑 Shutdown signal received");
        shutdown.cancel();
    });
}

async fn run_select() -> Result<()> {
    let config = load_config()?;
    let alpaca = AlpacaClient::new(&config.broker)?;
    let portfolio = PortfolioConfig::from_settings(&config.portfolio);
    let selector =
        CandidateSelector::new(config.selection.clone(), SignalBlender::new(&config.strategy));

    let selection = selector
        .select(portfolio.universe(), portfolio.sleeve_profile(), &alpaca)
        .await;

    println!("\n📊 Ranked candidates ({} scored)", selection.ranked.len());
    for candidate in &selection.ranked {
        println!(
            "   {:<6} {:<14} score {:>8.4}  momentum {:>8.5}  vol {:>6.3}  hurst {:.3}",
            candidate.symbol,
            candidate.sector,
            candidate.score,
            candidate.momentum.raw,
            candidate.momentum.volatility,
            candidate.hurst,
        );
    }

    println!("\n🎯 Trading sleeve");
    if selection.sleeve.is_empty() {
        println!("   (empty)");
    }
    for (symbol, profile) in selection.sleeve.iter() {
        println!(
            "   ├─ {:<6} {:<14} allocation {:.0}%",
            symbol,
            profile.sector,
            profile.target_allocation * dec!(100)
        );
    }
    Ok(())
}

async fn run_signal(symbol: &str) -> Result<()> {
    let config = load_config()?;
    let symbol = symbol.to_uppercase();
    let alpaca = AlpacaClient::new(&config.broker)?;
    let portfolio = PortfolioConfig::from_settings(&config.portfolio);

    let profile = match portfolio.core().get(&symbol) {
        Some(profile) => profile.clone(),
        None => {
            let mut profile = portfolio.sleeve_profile().clone();
            if let Some(sector) = portfolio.universe().sector_of(&symbol) {
                profile.sector = sector.to_string();
            }
            profile
        }
    };

    let series = alpaca
        .get_bars(&symbol, config.strategy.signal_lookback_days)
        .await
        .with_context(|| format!("Failed to fetch bars for {symbol}"))?;
    let signal = SignalBlender::new(&config.strategy)
        .blend(&symbol, &series.closes(), &profile)
        .with_context(|| format!("Cannot compute signal for {symbol}"))?;

    let price = series.last_close().unwrap_or(Decimal::ZERO);
    let target = PositionSizer::from_config(&config.strategy, &config.capital).size(
        signal.combined,
        &profile,
        config.capital.initial_investment,
        price,
    );

    println!("\n📈 {} ({}, {} bars)", symbol, profile.sector, series.len());
    println!("   ├─ Momentum (raw):       {:.6}", signal.momentum.raw);
    println!("   ├─ Volatility (annual):  {:.4}", signal.momentum.volatility);
    println!("   ├─ Momentum (risk adj):  {:.4}", signal.momentum.risk_adjusted);
    println!("   ├─ Mean reversion:       {:.4}", signal.mean_reversion);
    println!("   ├─ Hurst exponent:       {:.4}", signal.hurst);
    println!(
        "   ├─ Weights:              momentum {:.3} / reversion {:.3}",
        signal.momentum_weight, signal.mean_rev_weight
    );
    if signal.amplified {
        println!("   ├─ Risk multiplier applied");
    }
    println!("   ├─ Combined signal:      {:.4}", signal.combined);
    println!(
        "   └─ Target @ ${:.2}:      ${:.2} ({} shares)",
        price,
        target.value,
        if signal.combined < 0.0 {
            Decimal::ZERO
        } else {
            target.quantity
        }
    );
    Ok(())
}

fn show_status(db_path: &str, event_limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              MERVAL TRADER PAPER STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The paper trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    match persistence.load_state()? {
        None => {
            println!("\n❌ No saved paper state found in database.");
        }
        Some(state) => {
            let equity = state.equity();
            let pnl = equity - state.initial_balance;
            let pnl_pct = if state.initial_balance > Decimal::ZERO {
                (pnl / state.initial_balance) * dec!(100)
            } else {
                Decimal::ZERO
            };

            println!("\n📊 Account Summary");
            println!("   ├─ Initial Balance:  ${:.2}", state.initial_balance);
            println!("   ├─ Cash:             ${:.2}", state.cash);
            println!("   ├─ Equity:           ${:.2}", equity);
            println!("   ├─ PnL:              ${:.2} ({:+.2}%)", pnl, pnl_pct);
            println!("   ├─ Realized PnL:     ${:.2}", state.realized_pnl);
            println!("   ├─ Fees Paid:        ${:.2}", state.total_fees);
            println!("   ├─ Total Orders:     {}", state.order_count);
            println!(
                "   └─ Last Updated:     {}",
                state.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
            );

            if !state.positions.is_empty() {
                println!("\n🔓 Open Positions");
                let mut positions: Vec<_> = state.positions.values().collect();
                positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
                for pos in positions {
                    let unrealized = (pos.last_price - pos.avg_entry_price) * pos.quantity;
                    println!(
                        "   ├─ {:<6} {} @ ${:.2} (last ${:.2}, unrealized ${:.2}, opened {})",
                        pos.symbol,
                        pos.quantity,
                        pos.avg_entry_price,
                        pos.last_price,
                        unrealized,
                        pos.opened_at.format("%Y-%m-%d")
                    );
                }
            }
        }
    }

    let counts = persistence.event_counts()?;
    if !counts.is_empty() {
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        println!("\n📈 Event Totals");
        for (kind, count) in counts {
            println!("   ├─ {:<10} {}", kind, count);
        }
    }

    let events = persistence.recent_events(event_limit)?;
    if !events.is_empty() {
        println!("\n📜 Recent Events");
        for event in events {
            println!(
                "   ├─ {} {:<9} {:<6} {:<11} qty {:<8} price {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.kind.as_str(),
                event.symbol,
                event.reason.as_deref().unwrap_or("-"),
                event.qty.map(|q| q.to_string()).unwrap_or_else(|| "-".to_string()),
                event.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            );
        }
    }

    Ok(())
}

/// Initialize stdout plus hourly rolling file logging.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "merval-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("merval_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Capital: ${}", config.capital.initial_investment);
    info!(
        "   Core: {}",
        config
            .portfolio
            .core
            .iter()
            .map(|(symbol, p)| format!("{symbol} {:.0}%", p.target_allocation * dec!(100)))
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   Candidates: {}", config.portfolio.candidates.len());
    info!(
        "   Windows: momentum {} / volatility {} / reversion {}",
        config.strategy.momentum_window,
        config.strategy.volatility_window,
        config.strategy.mean_rev_window
    );
    info!(
        "   Hurst Lags: {}..={}",
        config.strategy.hurst_min_lag, config.strategy.hurst_max_lag
    );
    info!(
        "   Max Position Increase: {}x",
        config.strategy.max_position_increase
    );
    info!(
        "   Rebalance Threshold: {:.0}%",
        config.strategy.rebalance_threshold * dec!(100)
    );
    info!(
        "   Selection: top {} every {}s, min dollar volume ${}",
        config.selection.max_selected,
        config.selection.interval_secs,
        config.selection.min_daily_volume
    );
}
