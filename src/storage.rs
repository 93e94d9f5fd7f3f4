//! Persistent state stores
//! Owns the two stream-processor stores (velocity-windows, current-velocity)
//! plus the analyst feedback log and the per-analyzer knowledge log. WAL
//! mode so the HTTP surface can read while partition workers commit.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::models::AnalystFeedback;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS velocity_windows (
    customer_id TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    event_count INTEGER NOT NULL,
    PRIMARY KEY (customer_id, window_start)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS current_velocity (
    customer_id TEXT PRIMARY KEY,
    window_start INTEGER NOT NULL,
    event_count INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS analyst_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id TEXT NOT NULL,
    actual_fraud INTEGER NOT NULL,
    feedback TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_txn
    ON analyst_feedback(transaction_id, created_at DESC);

CREATE TABLE IF NOT EXISTS analyzer_knowledge (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analyzer_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    actual_fraud INTEGER NOT NULL,
    note TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_analyzer
    ON analyzer_knowledge(analyzer_id, created_at DESC);
"#;

/// A velocity window row as persisted and restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRow {
    pub customer_id: String,
    pub window_start: i64,
    pub event_count: u64,
}

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("open state store")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        info!(path, "state store open");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Batch-commit dirty window counts. One transaction covers both the
    /// window table and the latest-count projection, so a restart never
    /// observes one without the other.
    pub fn commit_windows(&self, rows: &[WindowRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin window commit")?;
        {
            let mut upsert_window = tx.prepare_cached(
                "INSERT INTO velocity_windows (customer_id, window_start, event_count)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(customer_id, window_start) DO UPDATE SET event_count = excluded.event_count",
            )?;
            let mut upsert_current = tx.prepare_cached(
                "INSERT INTO current_velocity (customer_id, window_start, event_count)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(customer_id) DO UPDATE SET
                     window_start = excluded.window_start,
                     event_count = excluded.event_count
                 WHERE excluded.window_start >= current_velocity.window_start",
            )?;
            for row in rows {
                upsert_window.execute(params![
                    row.customer_id,
                    row.window_start,
                    row.event_count as i64
                ])?;
                upsert_current.execute(params![
                    row.customer_id,
                    row.window_start,
                    row.event_count as i64
                ])?;
            }
        }
        tx.commit().context("commit windows")?;
        debug!(rows = rows.len(), "velocity windows committed");
        Ok(())
    }

    /// Restore every persisted window row; the in-memory store replays these
    /// on startup.
    pub fn load_windows(&self) -> Result<Vec<WindowRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT customer_id, window_start, event_count FROM velocity_windows")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WindowRow {
                    customer_id: row.get(0)?,
                    window_start: row.get(1)?,
                    event_count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest count per customer as of the last commit.
    pub fn current_velocity(&self, customer_id: &str) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT event_count FROM current_velocity WHERE customer_id = ?1")?;
        let mut rows = stmt.query(params![customer_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, i64>(0)? as u64)),
            None => Ok(None),
        }
    }

    pub fn record_feedback(&self, feedback: &AnalystFeedback) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO analyst_feedback (transaction_id, actual_fraud, feedback, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![
            feedback.transaction_id,
            feedback.actual_fraud as i64,
            feedback.feedback,
            feedback.timestamp.timestamp()
        ])?;
        Ok(())
    }

    /// Append-only knowledge row for one analyzer. Write-only by design:
    /// nothing on the decision path reads this back.
    pub fn record_knowledge(&self, analyzer_id: &str, feedback: &AnalystFeedback) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO analyzer_knowledge (analyzer_id, transaction_id, actual_fraud, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            analyzer_id,
            feedback.transaction_id,
            feedback.actual_fraud as i64,
            feedback.feedback,
            feedback.timestamp.timestamp()
        ])?;
        Ok(())
    }

    pub fn feedback_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM analyst_feedback", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn knowledge_count(&self, analyzer_id: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analyzer_knowledge WHERE analyzer_id = ?1",
            params![analyzer_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Drop windows that closed before the cutoff. Keeps the store bounded;
    /// the current-velocity projection is left alone.
    pub fn prune_windows_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM velocity_windows WHERE window_start < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    pub fn optimize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}
