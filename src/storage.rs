use anyhow::Result;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;

use crate::events::Event;
use crate::reconcile::positions::ReconciliationReport;
use crate::replay::engine::ReplayRow;

/// Append-only SQLite mirror of the audit trail.
pub struct AuditStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub ticker: Option<String>,
    pub order_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReconciliation {
    pub id: i64,
    pub timestamp: String,
    pub status: String,
    pub matched: i64,
    pub mismatches: i64,
    pub critical_count: i64,
    pub safety_level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReplay {
    pub id: i64,
    pub ticker: String,
    pub strategy: String,
    pub side: String,
    pub signal_price: f64,
    pub execution_price: f64,
    pub slippage_pct: f64,
    pub pnl_pct: f64,
    pub bt_predicted_return: Option<f64>,
    pub bt_win_prob: Option<f64>,
    pub direction_match: Option<bool>,
}

impl AuditStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    /// Read-only handle for the audit CLI.
    pub fn open_read_only(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                ticker TEXT,
                order_id TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_log_type ON event_log (event_type);
            CREATE TABLE IF NOT EXISTS reconciliation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                matched INTEGER NOT NULL,
                mismatches INTEGER NOT NULL,
                critical_count INTEGER NOT NULL,
                safety_level TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS execution_replay (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                signal_price REAL NOT NULL,
                execution_price REAL NOT NULL,
                slippage_pct REAL NOT NULL,
                pnl_pct REAL NOT NULL,
                bt_predicted_return REAL,
                bt_win_prob REAL,
                direction_match INTEGER
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn add_events(&mut self, events: &[Event]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for e in events {
            tx.execute(
                "INSERT INTO event_log (event_type, severity, message, ticker, order_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    e.event_type.as_str(),
                    e.severity.as_str(),
                    e.message,
                    e.ticker,
                    e.order_id,
                    e.timestamp.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn add_reconciliation(&mut self, report: &ReconciliationReport) -> Result<()> {
        self.conn.execute(
            "INSERT INTO reconciliation_log (timestamp, status, matched, mismatches, critical_count, safety_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.timestamp.to_rfc3339(),
                report.status.as_str(),
                report.matched_positions as i64,
                report.mismatch_count as i64,
                report.critical_count() as i64,
                report.safety_level_after.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn add_execution_replay(&mut self, row: &ReplayRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO execution_replay (ticker, strategy, side, signal_price, execution_price,
                slippage_pct, pnl_pct, bt_predicted_return, bt_win_prob, direction_match)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.ticker,
                row.strategy,
                row.side,
                row.signal_price,
                row.execution_price,
                row.slippage_pct,
                row.pnl_pct,
                row.bt_predicted_return,
                row.bt_win_prob,
                row.direction_match,
            ],
        )?;
        Ok(())
    }

    /// Newest first, optionally restricted to one dotted event type.
    pub fn get_events(&self, event_type: Option<&str>, limit: usize) -> Result<Vec<StoredEvent>> {
        let sql = "SELECT id, event_type, severity, message, ticker, order_id, timestamp
                   FROM event_log WHERE (?1 IS NULL OR event_type = ?1)
                   ORDER BY id DESC LIMIT ?2";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![event_type, limit as i64], |r| {
            Ok(StoredEvent {
                id: r.get(0)?,
                event_type: r.get(1)?,
                severity: r.get(2)?,
                message: r.get(3)?,
                ticker: r.get(4)?,
                order_id: r.get(5)?,
                timestamp: r.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_reconciliations(&self, limit: usize) -> Result<Vec<StoredReconciliation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, status, matched, mismatches, critical_count, safety_level
             FROM reconciliation_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |r| {
            Ok(StoredReconciliation {
                id: r.get(0)?,
                timestamp: r.get(1)?,
                status: r.get(2)?,
                matched: r.get(3)?,
                mismatches: r.get(4)?,
                critical_count: r.get(5)?,
                safety_level: r.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_execution_replays(&self, limit: usize) -> Result<Vec<StoredReplay>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticker, strategy, side, signal_price, execution_price, slippage_pct, pnl_pct,
                    bt_predicted_return, bt_win_prob, direction_match
             FROM execution_replay ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], replay_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_execution_replays_by_strategy(&self, strategy: &str, limit: usize) -> Result<Vec<StoredReplay>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticker, strategy, side, signal_price, execution_price, slippage_pct, pnl_pct,
                    bt_predicted_return, bt_win_prob, direction_match
             FROM execution_replay WHERE strategy = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![strategy, limit as i64], replay_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn replay_from_row(r: &Row<'_>) -> rusqlite::Result<StoredReplay> {
    Ok(StoredReplay {
        id: r.get(0)?,
        ticker: r.get(1)?,
        strategy: r.get(2)?,
        side: r.get(3)?,
        signal_price: r.get(4)?,
        execution_price: r.get(5)?,
        slippage_pct: r.get(6)?,
        pnl_pct: r.get(7)?,
        bt_predicted_return: r.get(8)?,
        bt_win_prob: r.get(9)?,
        direction_match: r.get(10)?,
    })
}
