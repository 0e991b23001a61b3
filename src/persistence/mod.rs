//! SQLite persistence for paper trading state and the strategy journal.
//!
//! Persists state to survive restarts:
//! - Paper account cash, fees and realized P&L
//! - Open paper positions
//! - Strategy events (exits, rebalances, selections)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::events::{EventSink, StrategyEvent, TracingEventSink};

/// Persisted paper position.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub last_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Persisted paper account.
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub initial_balance: Decimal,
    pub cash: Decimal,
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,
    pub order_count: u64,
    pub positions: HashMap<String, PersistedPosition>,
    pub last_saved: DateTime<Utc>,
}

impl PersistedState {
    /// Cash plus positions valued at their last price.
    pub fn equity(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.quantity * p.last_price)
                .sum::<Decimal>()
    }
}

fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_default()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open (or create) the database at `db_path`. Parent directories are
    /// created as needed; `":memory:"` opens a private in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Paper account (singleton row)
            CREATE TABLE IF NOT EXISTS paper_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_balance TEXT NOT NULL,
                cash TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                total_fees TEXT NOT NULL,
                order_count INTEGER NOT NULL,
                last_saved TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paper_positions (
                symbol TEXT PRIMARY KEY,
                quantity TEXT NOT NULL,
                avg_entry_price TEXT NOT NULL,
                last_price TEXT NOT NULL,
                opened_at TEXT NOT NULL
            );

            -- Strategy event journal
            CREATE TABLE IF NOT EXISTS strategy_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT NOT NULL,
                reason TEXT,
                qty TEXT,
                price TEXT,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON strategy_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_symbol ON strategy_events(symbol);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save the complete paper account.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO paper_state (id, initial_balance, cash, realized_pnl, total_fees,
                                     order_count, last_saved)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                initial_balance = ?1,
                cash = ?2,
                realized_pnl = ?3,
                total_fees = ?4,
                order_count = ?5,
                last_saved = ?6
            "#,
            params![
                state.initial_balance.to_string(),
                state.cash.to_string(),
                state.realized_pnl.to_string(),
                state.total_fees.to_string(),
                state.order_count,
                state.last_saved.to_rfc3339(),
            ],
        )?;

        // Clear and reinsert positions
        tx.execute("DELETE FROM paper_positions", [])?;

        for pos in state.positions.values() {
            tx.execute(
                r#"
                INSERT INTO paper_positions (symbol, quantity, avg_entry_price, last_price, opened_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    pos.symbol,
                    pos.quantity.to_string(),
                    pos.avg_entry_price.to_string(),
                    pos.last_price.to_string(),
                    pos.opened_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            cash = %state.cash,
            positions = state.positions.len(),
            "State saved to database"
        );
        Ok(())
    }

    /// Load the paper account, `None` when nothing was saved yet.
    pub fn load_state(&self) -> Result<Option<PersistedState>> {
        let state_row: Option<(String, String, String, String, u64, String)> = self
            .conn
            .query_row(
                r#"
                SELECT initial_balance, cash, realized_pnl, total_fees, order_count, last_saved
                FROM paper_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((initial_balance, cash, realized_pnl, fees, order_count, last_saved)) = state_row
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol, quantity, avg_entry_price, last_price, opened_at
            FROM paper_positions
            "#,
        )?;

        let positions: HashMap<String, PersistedPosition> = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                Ok((
                    symbol.clone(),
                    PersistedPosition {
                        symbol,
                        quantity: parse_decimal(&row.get::<_, String>(1)?),
                        avg_entry_price: parse_decimal(&row.get::<_, String>(2)?),
                        last_price: parse_decimal(&row.get::<_, String>(3)?),
                        opened_at: parse_timestamp(&row.get::<_, String>(4)?),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let state = PersistedState {
            initial_balance: parse_decimal(&initial_balance),
            cash: parse_decimal(&cash),
            realized_pnl: parse_decimal(&realized_pnl),
            total_fees: parse_decimal(&fees),
            order_count,
            positions,
            last_saved: parse_timestamp(&last_saved),
        };

        info!(
            cash = %state.cash,
            positions = state.positions.len(),
            last_saved = %state.last_saved,
            "Loaded state from database"
        );

        Ok(Some(state))
    }

    /// Append a strategy event to the journal.
    pub fn record_event(&self, event: &StrategyEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to encode event")?;
        self.conn.execute(
            r#"
            INSERT INTO strategy_events (timestamp, kind, symbol, reason, qty, price, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.timestamp.to_rfc3339(),
                event.kind.as_str(),
                event.symbol,
                event.reason,
                event.qty.map(|v| v.to_string()),
                event.price.map(|v| v.to_string()),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<StrategyEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload
            FROM strategy_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|payload| serde_json::from_str(&payload).ok())
            .collect();

        Ok(events)
    }

    /// Event counts per kind.
    pub fn event_counts(&self) -> Result<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT kind, COUNT(*)
            FROM strategy_events
            GROUP BY kind
            "#,
        )?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.execute_batch(
            r#"
            DELETE FROM paper_state;
            DELETE FROM paper_positions;
            DELETE FROM strategy_events;
            "#,
        )?;
        Ok(())
    }
}

/// Event sink that journals to SQLite and mirrors to tracing.
pub struct JournalEventSink {
    manager: Mutex<PersistenceManager>,
    tracing: TracingEventSink,
}

impl JournalEventSink {
    pub fn new(manager: PersistenceManager) -> Self {
        Self {
            manager: Mutex::new(manager),
            tracing: TracingEventSink,
        }
    }

    /// Run `f` against the underlying manager.
    pub fn with_manager<T>(&self, f: impl FnOnce(&PersistenceManager) -> Result<T>) -> Result<T> {
        let manager = self
            .manager
            .lock()
            .map_err(|_| anyhow::anyhow!("persistence lock poisoned"))?;
        f(&manager)
    }
}

impl EventSink for JournalEventSink {
    fn emit(&self, event: &StrategyEvent) {
        self.tracing.emit(event);
        if let Err(e) = self.with_manager(|m| m.record_event(event)) {
            error!(symbol = %event.symbol, error = %e, "Failed to journal strategy event");
        }
    }
}
