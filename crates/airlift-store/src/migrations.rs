// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ordered schema migrations.
//
// Databases live on users' devices across many releases, so the schema is
// never edited in place.  Every change is a new named migration appended to
// the registry below.  The runner records applied names in the
// `applied_migrations` ledger and applies only the suffix that has not run
// yet, each migration inside its own transaction together with its ledger
// row.  Never reorder or rename an entry once it has shipped.

use airlift_core::error::{AirliftError, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, error, info};

/// One forward schema change.
pub trait Migration {
    /// Stable name recorded in the ledger.
    fn name(&self) -> &str;

    /// Apply the change.  Runs inside a transaction owned by the runner.
    fn apply(&self, conn: &Connection) -> rusqlite::Result<()>;
}

/// A migration expressed as a batch of SQL statements.
pub struct SqlMigration {
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(self.sql)
    }
}

const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS applied_migrations (
    name       TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

const CREATE_UPDATES_AND_ASSETS_SQL: &str = r#"
    CREATE TABLE updates (
        id              TEXT PRIMARY KEY,
        scope_key       TEXT NOT NULL,
        commit_time     TEXT NOT NULL,
        runtime_version TEXT NOT NULL,
        launch_asset_id INTEGER,
        manifest        TEXT NOT NULL,
        status          TEXT NOT NULL,
        last_accessed   TEXT NOT NULL
    );
    CREATE TABLE assets (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        key                 TEXT NOT NULL UNIQUE,
        content_type        TEXT NOT NULL,
        content_hash        TEXT,
        local_path          TEXT,
        download_time       TEXT,
        marked_for_deletion INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE updates_assets (
        update_id TEXT    NOT NULL REFERENCES updates(id) ON DELETE CASCADE,
        asset_id  INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
        UNIQUE (update_id, asset_id)
    );
    CREATE INDEX idx_updates_scope_key ON updates(scope_key);
    CREATE INDEX idx_updates_assets_asset_id ON updates_assets(asset_id);
"#;

const ADD_EXPECTED_HASH_SQL: &str = r#"
    ALTER TABLE assets ADD COLUMN expected_hash TEXT;
"#;

const ADD_LAUNCH_COUNTS_SQL: &str = r#"
    ALTER TABLE updates ADD COLUMN successful_launch_count INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE updates ADD COLUMN failed_launch_count INTEGER NOT NULL DEFAULT 0;
"#;

const CREATE_JSON_DATA_SQL: &str = r#"
    CREATE TABLE json_data (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        key          TEXT NOT NULL,
        value        TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        scope_key    TEXT NOT NULL,
        UNIQUE (key, scope_key)
    );
"#;

const CREATE_BUILD_DATA_SQL: &str = r#"
    CREATE TABLE build_data (
        id          INTEGER PRIMARY KEY CHECK (id = 1),
        fingerprint TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    );
"#;

/// The shipped migration registry, oldest first.
pub fn default_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(SqlMigration {
            name: "0001_create_updates_and_assets",
            sql: CREATE_UPDATES_AND_ASSETS_SQL,
        }),
        Box::new(SqlMigration {
            name: "0002_add_expected_hash",
            sql: ADD_EXPECTED_HASH_SQL,
        }),
        Box::new(SqlMigration {
            name: "0003_add_launch_counts",
            sql: ADD_LAUNCH_COUNTS_SQL,
        }),
        Box::new(SqlMigration {
            name: "0004_create_json_data",
            sql: CREATE_JSON_DATA_SQL,
        }),
        Box::new(SqlMigration {
            name: "0005_create_build_data",
            sql: CREATE_BUILD_DATA_SQL,
        }),
    ]
}

/// Names already recorded in the ledger, in the order they were applied.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    conn.execute_batch(LEDGER_SQL)
        .map_err(|e| AirliftError::Database(format!("create ledger: {e}")))?;

    let mut stmt = conn
        .prepare("SELECT name FROM applied_migrations ORDER BY rowid ASC")
        .map_err(|e| AirliftError::Database(format!("prepare ledger: {e}")))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| AirliftError::Database(format!("query ledger: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AirliftError::Database(format!("collect ledger: {e}")))?;
    Ok(names)
}

/// Apply every migration in `registry` that the ledger has not seen.
///
/// Returns the names applied by this call, in order.  Stops at the first
/// failure; that migration is rolled back and earlier ones stay applied.
pub fn run_migrations(
    conn: &mut Connection,
    registry: &[Box<dyn Migration>],
) -> Result<Vec<String>> {
    let done = applied_migrations(conn)?;
    let mut applied = Vec::new();

    for migration in registry {
        let name = migration.name();
        if done.iter().any(|d| d == name) {
            continue;
        }

        let tx = conn.transaction().map_err(|e| migration_err(name, e))?;
        if let Err(e) = migration.apply(&tx) {
            error!(migration = name, error = %e, "migration failed, rolling back");
            return Err(migration_err(name, e));
        }
        tx.execute(
            "INSERT INTO applied_migrations (name, applied_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)],
        )
        .map_err(|e| migration_err(name, e))?;
        tx.commit().map_err(|e| migration_err(name, e))?;

        debug!(migration = name, "migration applied");
        applied.push(name.to_owned());
    }

    if !applied.is_empty() {
        info!(count = applied.len(), "schema migrations applied");
    }
    Ok(applied)
}

fn migration_err(name: &str, e: rusqlite::Error) -> AirliftError {
    AirliftError::Migration {
        name: name.to_owned(),
        reason: e.to_string(),
    }
}
