// Trade journal
// SQLite append-only log of every closed trade and every live fill's slippage
//
// The portfolio snapshot keeps a bounded history; the journal keeps all of it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::slippage::{SlippageRecord, SlippageStats};
use crate::types::ClosedTrade;

// =============================================================================
// Data Models
// =============================================================================

/// One journal row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub fees: f64,
    pub net_pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: String,
}

// =============================================================================
// Journal Implementation
// =============================================================================

pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::create_tables(&conn)?;

        info!("Trade journal opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Journal held in memory, for tests and dry runs
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                fees REAL DEFAULT 0,
                net_pnl REAL DEFAULT 0,
                pnl_pct REAL DEFAULT 0,
                exit_reason TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS slippage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                expected_price REAL NOT NULL,
                executed_price REAL NOT NULL,
                slippage_pct REAL NOT NULL,
                time TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn record_trade(&self, trade: &ClosedTrade) -> Result<(), PersistenceError> {
        let position = &trade.position;
        let exit = position
            .exit
            .as_ref()
            .ok_or_else(|| PersistenceError::Incomplete(position.symbol.to_string()))?;

        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        conn.execute(
            "INSERT INTO trades
             (symbol, side, quantity, entry_price, exit_price, entry_time,
              exit_time, fees, net_pnl, pnl_pct, exit_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                position.symbol.as_str(),
                position.side.to_string(),
                position.quantity,
                position.entry_price,
                exit.price,
                position.entry_time.to_rfc3339(),
                exit.time.to_rfc3339(),
                trade.total_fees,
                trade.net_pnl,
                trade.pnl_percent,
                exit.reason.as_str(),
            ],
        )?;

        let result = if trade.is_win() { "WIN" } else { "LOSS" };
        info!(
            "Trade recorded: {} {:.8} @ {:.8} -> {:.8} | Net: {:.4} ({:+.2}%) | {} | {}",
            position.symbol,
            position.quantity,
            position.entry_price,
            exit.price,
            trade.net_pnl,
            trade.pnl_percent,
            exit.reason,
            result
        );
        Ok(())
    }

    /// Most recent trades, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, quantity, entry_price, exit_price, entry_time,
                    exit_time, fees, net_pnl, pnl_pct, exit_reason
             FROM trades ORDER BY id DESC LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(JournalEntry {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                    side: row.get(2)?,
                    quantity: row.get(3)?,
                    entry_price: row.get(4)?,
                    exit_price: row.get(5)?,
                    entry_time: parse_time(&row.get::<_, String>(6)?),
                    exit_time: parse_time(&row.get::<_, String>(7)?),
                    fees: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
                    net_pnl: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
                    pnl_pct: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
                    exit_reason: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} journal entries", entries.len());
        Ok(entries)
    }

    pub fn record_slippage(&self, record: &SlippageRecord) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        conn.execute(
            "INSERT INTO slippage
             (symbol, side, expected_price, executed_price, slippage_pct, time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.symbol.as_str(),
                record.side.to_string(),
                record.expected_price,
                record.executed_price,
                record.slippage_pct,
                record.time.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Aggregate over every recorded fill
    pub fn slippage_stats(&self) -> Result<SlippageStats, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let stats = conn.query_row(
            "SELECT COUNT(*), AVG(slippage_pct), MIN(slippage_pct), MAX(slippage_pct)
             FROM slippage",
            [],
            |row| {
                Ok(SlippageStats {
                    count: row.get::<_, i64>(0)?.max(0) as u64,
                    average_pct: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    min_pct: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    max_pct: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                })
            },
        )?;
        Ok(stats)
    }

    pub fn count(&self) -> Result<u64, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}
