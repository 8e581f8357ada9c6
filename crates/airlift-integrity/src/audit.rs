// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only SQLite log of update lifecycle events.
//
// Schema:
//   update_events(
//     id         INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp  TEXT    NOT NULL,   -- RFC 3339, fixed-width UTC
//     action     TEXT    NOT NULL,   -- e.g. "launch", "reap", "build_data_reset"
//     update_id  TEXT,               -- UUID of the update involved, if any
//     success    INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details    TEXT                -- optional free-form context
//   )

use std::path::Path;

use airlift_core::error::{AirliftError, Result};
use airlift_core::types::UpdateId;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS update_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp  TEXT    NOT NULL,
    action     TEXT    NOT NULL,
    update_id  TEXT,
    success    INTEGER NOT NULL,
    details    TEXT
);
CREATE INDEX IF NOT EXISTS idx_update_events_update_id ON update_events(update_id);";

/// Convert a `rusqlite::Error` into an `AirliftError::Database`.
fn db_err(e: rusqlite::Error) -> AirliftError {
    AirliftError::Database(e.to_string())
}

/// Fixed-width UTC timestamps sort lexically in time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A single entry in the audit log, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub update_id: Option<String>,
    pub success: bool,
    pub details: Option<String>,
}

/// Append-only log of launches, fallbacks, build-data resets, patches and
/// reaps, kept for diagnostics.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self { conn })
    }

    /// Record a new audit entry.
    #[instrument(skip(self, details), fields(%action, success))]
    pub fn record(
        &self,
        action: &str,
        update_id: Option<&UpdateId>,
        success: bool,
        details: Option<&str>,
    ) -> Result<()> {
        self.record_at(Utc::now(), action, update_id, success, details)
    }

    fn record_at(
        &self,
        at: DateTime<Utc>,
        action: &str,
        update_id: Option<&UpdateId>,
        success: bool,
        details: Option<&str>,
    ) -> Result<()> {
        let success_int: i32 = if success { 1 } else { 0 };

        self.conn
            .execute(
                "INSERT INTO update_events (timestamp, action, update_id, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    timestamp(at),
                    action,
                    update_id.map(|id| id.to_string()),
                    success_int,
                    details
                ],
            )
            .map_err(db_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// Retrieve all entries for one update, oldest first.
    pub fn entries_for_update(&self, update_id: &UpdateId) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, update_id, success, details
                 FROM update_events
                 WHERE update_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![update_id.to_string()], row_to_entry)
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    /// Retrieve the most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, update_id, success, details
                 FROM update_events
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(db_err)?;

        let rows = stmt.query_map(params![limit], row_to_entry).map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    /// Delete entries older than `max_age`.  Returns how many were removed.
    pub fn purge_older_than(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = timestamp(Utc::now() - max_age);
        let removed = self
            .conn
            .execute(
                "DELETE FROM update_events WHERE timestamp < ?1",
                params![cutoff],
            )
            .map_err(db_err)?;

        if removed > 0 {
            info!(removed, "purged old audit entries");
        }
        Ok(removed)
    }

    /// Return the total number of entries in the audit log.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM update_events", [], |row| row.get(0))
            .map_err(db_err)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        action: row.get(2)?,
        update_id: row.get(3)?,
        success: row.get::<_, i32>(4)? != 0,
        details: row.get(5)?,
    })
}
