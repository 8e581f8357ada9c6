// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent update store backed by SQLite.
//
// The store keeps every known update (manifest, status, launch counters) and
// every asset row, joined many-to-many through `updates_assets` so that one
// file on disk can serve several updates.  Asset bytes live in the updates
// directory; rows only hold the relative filename and hashes.
//
// Every mutating operation runs inside a single transaction.  Reads are
// serialised against writes by SQLite's own locking.

use std::path::Path;

use airlift_core::error::{AirliftError, Result};
use airlift_core::types::{Asset, ManifestFilters, Update, UpdateId, UpdateStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use crate::migrations::{Migration, default_migrations, run_migrations};

const UPDATE_COLUMNS: &str = "id, scope_key, commit_time, runtime_version, manifest, status,
     last_accessed, successful_launch_count, failed_launch_count";

const ASSET_COLUMNS: &str = "a.key, a.content_type, a.expected_hash, a.content_hash,
     a.local_path, a.download_time";

const MANIFEST_FILTERS_KEY: &str = "manifestFilters";

/// Map a rusqlite error into `AirliftError::Database` with some context.
fn db(context: &'static str) -> impl FnOnce(rusqlite::Error) -> AirliftError {
    move |e| AirliftError::Database(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamps sort lexically in time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed store of updates, assets, and build data.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively.  In an async context, wrap calls in `tokio::task::spawn_blocking`.
pub struct UpdatesDatabase {
    conn: Connection,
}

impl UpdatesDatabase {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &default_migrations())
    }

    /// Open the store with an explicit migration registry.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_with(path: impl AsRef<Path>, registry: &[Box<dyn Migration>]) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db("open"))?;

        // WAL lets the reaper read while the UI thread queries launch state,
        // and survives unclean shutdowns more gracefully.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db("WAL pragma"))?;

        let store = Self::prepare(conn, registry)?;
        info!("updates database opened");
        Ok(store)
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db("open in-memory"))?;
        let store = Self::prepare(conn, &default_migrations())?;
        debug!("in-memory updates database opened");
        Ok(store)
    }

    fn prepare(mut conn: Connection, registry: &[Box<dyn Migration>]) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db("foreign_keys pragma"))?;
        run_migrations(&mut conn, registry)?;
        Ok(Self { conn })
    }

    /// Close the connection, reporting errors that dropping would swallow.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| db("close")(e))?;
        debug!("updates database closed");
        Ok(())
    }

    // -- Updates -------------------------------------------------------------

    /// Insert an update and its assets.
    ///
    /// Idempotent: an existing update id is left untouched, assets are shared
    /// by key (an existing row only gains fields it was missing), and join
    /// rows are unique per (update, asset).
    #[instrument(skip(self, update, assets), fields(update_id = %update.id, assets = assets.len()))]
    pub fn add_update(&mut self, update: &Update, assets: &[Asset]) -> Result<()> {
        let manifest_json = serde_json::to_string(&update.manifest)?;
        let id = update.id.to_string();

        let tx = self.conn.transaction().map_err(db("begin add_update"))?;
        tx.execute(
            "INSERT OR IGNORE INTO updates (id, scope_key, commit_time, runtime_version,
             manifest, status, last_accessed, successful_launch_count, failed_launch_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                update.scope_key,
                ts(&update.commit_time),
                update.runtime_version,
                manifest_json,
                update.status.as_str(),
                ts(&update.last_accessed),
                update.successful_launch_count,
                update.failed_launch_count,
            ],
        )
        .map_err(db("insert update"))?;

        for asset in assets {
            tx.execute(
                "INSERT INTO assets (key, content_type, expected_hash, content_hash,
                 local_path, download_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                     expected_hash = COALESCE(assets.expected_hash, excluded.expected_hash),
                     content_hash  = COALESCE(assets.content_hash, excluded.content_hash),
                     local_path    = COALESCE(assets.local_path, excluded.local_path),
                     download_time = COALESCE(assets.download_time, excluded.download_time)",
                params![
                    asset.key,
                    asset.content_type,
                    asset.expected_hash,
                    asset.content_hash,
                    asset.local_path,
                    asset.download_time.as_ref().map(ts),
                ],
            )
            .map_err(db("upsert asset"))?;

            let asset_id: i64 = tx
                .query_row(
                    "SELECT id FROM assets WHERE key = ?1",
                    params![asset.key],
                    |row| row.get(0),
                )
                .map_err(db("lookup asset id"))?;

            tx.execute(
                "INSERT OR IGNORE INTO updates_assets (update_id, asset_id) VALUES (?1, ?2)",
                params![id, asset_id],
            )
            .map_err(db("link asset"))?;

            if asset.is_launch_asset {
                tx.execute(
                    "UPDATE updates SET launch_asset_id = ?1 WHERE id = ?2",
                    params![asset_id, id],
                )
                .map_err(db("set launch asset"))?;
            }
        }

        tx.commit().map_err(db("commit add_update"))?;
        info!(update_id = %update.id, "update stored");
        Ok(())
    }

    /// Promote a pending update to `Ready` once every owned asset has a file.
    ///
    /// Updates in any other state are left as they are.
    #[instrument(skip(self), fields(update_id = %update_id))]
    pub fn mark_update_ready(&mut self, update_id: &UpdateId) -> Result<()> {
        let id = update_id.to_string();
        let tx = self.conn.transaction().map_err(db("begin mark_ready"))?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM updates WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db("read status"))?;
        let Some(status) = status else {
            return Err(AirliftError::Database(format!("update {update_id} not found")));
        };

        let missing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM assets a
                 JOIN updates_assets ua ON ua.asset_id = a.id
                 WHERE ua.update_id = ?1 AND a.local_path IS NULL",
                params![id],
                |row| row.get(0),
            )
            .map_err(db("count missing assets"))?;
        if missing > 0 {
            return Err(AirliftError::Integrity(format!(
                "update {update_id} has {missing} asset(s) without a local file"
            )));
        }

        if status == UpdateStatus::Pending.as_str() {
            tx.execute(
                "UPDATE updates SET status = ?1 WHERE id = ?2",
                params![UpdateStatus::Ready.as_str(), id],
            )
            .map_err(db("mark ready"))?;
            debug!("update marked ready");
        }

        tx.commit().map_err(db("commit mark_ready"))?;
        Ok(())
    }

    /// Record a successful launch of a verified update.  Embedded updates
    /// keep their status.
    #[instrument(skip(self), fields(update_id = %update_id))]
    pub fn mark_update_launchable(&mut self, update_id: &UpdateId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE updates SET status = ?1 WHERE id = ?2 AND status IN (?3, ?4)",
                params![
                    UpdateStatus::Launchable.as_str(),
                    update_id.to_string(),
                    UpdateStatus::Pending.as_str(),
                    UpdateStatus::Ready.as_str(),
                ],
            )
            .map_err(db("mark launchable"))?;

        if rows == 0 && self.update(update_id)?.is_none() {
            return Err(AirliftError::Database(format!("update {update_id} not found")));
        }
        Ok(())
    }

    /// Bump `last_accessed`.  Returns `false` (and changes nothing) when `at`
    /// is older than the stored value.
    pub fn set_last_accessed(&mut self, update_id: &UpdateId, at: DateTime<Utc>) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE updates SET last_accessed = ?1 WHERE id = ?2 AND last_accessed <= ?1",
                params![ts(&at), update_id.to_string()],
            )
            .map_err(db("set last_accessed"))?;

        if rows > 0 {
            return Ok(true);
        }
        if self.update(update_id)?.is_none() {
            return Err(AirliftError::Database(format!("update {update_id} not found")));
        }
        debug!(update_id = %update_id, "refused to move last_accessed backwards");
        Ok(false)
    }

    pub fn increment_successful_launch_count(&mut self, update_id: &UpdateId) -> Result<()> {
        self.bump_counter("successful_launch_count", update_id)
    }

    pub fn increment_failed_launch_count(&mut self, update_id: &UpdateId) -> Result<()> {
        self.bump_counter("failed_launch_count", update_id)
    }

    fn bump_counter(&mut self, column: &'static str, update_id: &UpdateId) -> Result<()> {
        let sql = format!("UPDATE updates SET {column} = {column} + 1 WHERE id = ?1");
        let rows = self
            .conn
            .execute(&sql, params![update_id.to_string()])
            .map_err(db("bump launch counter"))?;
        if rows == 0 {
            return Err(AirliftError::Database(format!("update {update_id} not found")));
        }
        Ok(())
    }

    /// Retrieve a single update by id.
    pub fn update(&self, update_id: &UpdateId) -> Result<Option<Update>> {
        let sql = format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = ?1");
        self.conn
            .query_row(&sql, params![update_id.to_string()], row_to_update)
            .optional()
            .map_err(db("get update"))
    }

    /// Snapshot of every update in the store.
    pub fn all_updates(&self) -> Result<Vec<Update>> {
        let sql = format!("SELECT {UPDATE_COLUMNS} FROM updates ORDER BY commit_time ASC");
        self.query_updates(&sql, [])
    }

    /// Snapshot of the updates belonging to one scope.
    pub fn all_updates_for_scope(
        &self,
        scope_key: &str,
        include_embedded: bool,
    ) -> Result<Vec<Update>> {
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM updates
             WHERE scope_key = ?1 AND (?2 OR status != ?3)
             ORDER BY commit_time ASC"
        );
        self.query_updates(
            &sql,
            params![scope_key, include_embedded, UpdateStatus::Embedded.as_str()],
        )
    }

    /// Updates that may be offered to the selection policy.
    ///
    /// An update that failed to launch and never succeeded is left out; one
    /// that has launched successfully at least once stays in even after a
    /// later failure.
    pub fn launchable_updates(&self, scope_key: &str) -> Result<Vec<Update>> {
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM updates
             WHERE scope_key = ?1
               AND status IN (?2, ?3, ?4)
               AND (successful_launch_count > 0 OR failed_launch_count < 1)
             ORDER BY commit_time ASC"
        );
        self.query_updates(
            &sql,
            params![
                scope_key,
                UpdateStatus::Ready.as_str(),
                UpdateStatus::Launchable.as_str(),
                UpdateStatus::Embedded.as_str(),
            ],
        )
    }

    fn query_updates(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Update>> {
        let mut stmt = self.conn.prepare(sql).map_err(db("prepare updates"))?;
        let updates = stmt
            .query_map(args, row_to_update)
            .map_err(db("query updates"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db("collect updates"))?;
        Ok(updates)
    }

    // -- Assets --------------------------------------------------------------

    /// Assets owned by an update, with the launch asset flagged.
    pub fn assets_for_update(&self, update_id: &UpdateId) -> Result<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS}, COALESCE(u.launch_asset_id = a.id, 0)
             FROM assets a
             JOIN updates_assets ua ON ua.asset_id = a.id
             JOIN updates u ON u.id = ua.update_id
             WHERE u.id = ?1
             ORDER BY a.id ASC"
        );
        self.query_assets(&sql, params![update_id.to_string()])
    }

    /// Retrieve an asset row by key.
    pub fn asset(&self, key: &str) -> Result<Option<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS}, 0 FROM assets a WHERE a.key = ?1");
        self.conn
            .query_row(&sql, params![key], row_to_asset)
            .optional()
            .map_err(db("get asset"))
    }

    pub fn all_assets(&self) -> Result<Vec<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS}, 0 FROM assets a ORDER BY a.id ASC");
        self.query_assets(&sql, [])
    }

    fn query_assets(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Asset>> {
        let mut stmt = self.conn.prepare(sql).map_err(db("prepare assets"))?;
        let assets = stmt
            .query_map(args, row_to_asset)
            .map_err(db("query assets"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db("collect assets"))?;
        Ok(assets)
    }

    /// Record where a downloaded asset was written and what it hashed to.
    #[instrument(skip(self))]
    pub fn set_asset_file(
        &mut self,
        key: &str,
        local_path: &str,
        content_hash: &str,
        download_time: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE assets SET local_path = ?1, content_hash = ?2, download_time = ?3
                 WHERE key = ?4",
                params![local_path, content_hash, ts(&download_time), key],
            )
            .map_err(db("set asset file"))?;
        if rows == 0 {
            return Err(AirliftError::Database(format!("asset {key} not found")));
        }
        Ok(())
    }

    /// Forget the files of assets found missing on disk and demote every
    /// non-embedded update that owns one back to `Pending`.
    ///
    /// Returns how many updates were demoted.
    pub fn mark_missing_assets(&mut self, keys: &[String]) -> Result<usize> {
        let tx = self.conn.transaction().map_err(db("begin mark_missing"))?;
        let mut demoted = 0;
        for key in keys {
            demoted += tx
                .execute(
                    "UPDATE updates SET status = ?1
                     WHERE status != ?2 AND id IN (
                         SELECT ua.update_id FROM updates_assets ua
                         JOIN assets a ON a.id = ua.asset_id
                         WHERE a.key = ?3)",
                    params![
                        UpdateStatus::Pending.as_str(),
                        UpdateStatus::Embedded.as_str(),
                        key
                    ],
                )
                .map_err(db("demote updates"))?;
            tx.execute(
                "UPDATE assets SET local_path = NULL, content_hash = NULL WHERE key = ?1",
                params![key],
            )
            .map_err(db("clear asset file"))?;
        }
        tx.commit().map_err(db("commit mark_missing"))?;

        if demoted > 0 {
            warn!(demoted, "updates demoted after missing assets");
        }
        Ok(demoted)
    }

    // -- Deletion ------------------------------------------------------------

    /// Delete updates and every asset no remaining update references.
    ///
    /// Order inside the transaction: join rows of the doomed updates, then
    /// assets left without references (keeping any that share a file or
    /// content hash with a referenced asset), then the update rows.  The
    /// deleted asset rows are returned so the caller can remove their files
    /// after the commit.
    #[instrument(skip(self, update_ids), fields(updates = update_ids.len()))]
    pub fn delete_updates_and_orphaned_assets(
        &mut self,
        update_ids: &[UpdateId],
    ) -> Result<Vec<Asset>> {
        let tx = self.conn.transaction().map_err(db("begin delete"))?;

        for id in update_ids {
            tx.execute(
                "DELETE FROM updates_assets WHERE update_id = ?1",
                params![id.to_string()],
            )
            .map_err(db("delete join rows"))?;
        }

        tx.execute_batch(
            "UPDATE assets SET marked_for_deletion = 1;
             UPDATE assets SET marked_for_deletion = 0
                 WHERE id IN (SELECT asset_id FROM updates_assets);
             UPDATE assets SET marked_for_deletion = 0
                 WHERE marked_for_deletion = 1 AND (
                     local_path IN (SELECT local_path FROM assets
                                    WHERE marked_for_deletion = 0 AND local_path IS NOT NULL)
                  OR content_hash IN (SELECT content_hash FROM assets
                                      WHERE marked_for_deletion = 0 AND content_hash IS NOT NULL));",
        )
        .map_err(db("mark orphaned assets"))?;

        let orphaned = {
            let sql = format!(
                "SELECT {ASSET_COLUMNS}, 0 FROM assets a WHERE a.marked_for_deletion = 1"
            );
            let mut stmt = tx.prepare(&sql).map_err(db("prepare orphaned"))?;
            stmt.query_map([], row_to_asset)
                .map_err(db("query orphaned"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db("collect orphaned"))?
        };

        tx.execute("DELETE FROM assets WHERE marked_for_deletion = 1", [])
            .map_err(db("delete orphaned assets"))?;

        for id in update_ids {
            tx.execute("DELETE FROM updates WHERE id = ?1", params![id.to_string()])
                .map_err(db("delete update"))?;
        }

        tx.commit().map_err(db("commit delete"))?;
        info!(
            updates = update_ids.len(),
            assets = orphaned.len(),
            "updates and orphaned assets deleted"
        );
        Ok(orphaned)
    }

    /// Delete every update that is not embedded.  Their assets become
    /// orphans for the next reap.
    pub fn clear_non_embedded_updates(&mut self) -> Result<usize> {
        let tx = self.conn.transaction().map_err(db("begin clear"))?;
        let cleared = clear_non_embedded(&tx)?;
        tx.commit().map_err(db("commit clear"))?;
        Ok(cleared)
    }

    // -- Build data ----------------------------------------------------------

    /// Fingerprint of the native build that last wrote this store.
    pub fn build_fingerprint(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT fingerprint FROM build_data WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db("read build fingerprint"))
    }

    pub fn set_build_fingerprint(&mut self, fingerprint: &str) -> Result<()> {
        upsert_fingerprint(&self.conn, fingerprint)
    }

    /// Clear non-embedded updates and record a new fingerprint atomically.
    pub fn replace_build_fingerprint(&mut self, fingerprint: &str) -> Result<usize> {
        let tx = self.conn.transaction().map_err(db("begin replace fingerprint"))?;
        let cleared = clear_non_embedded(&tx)?;
        upsert_fingerprint(&tx, fingerprint)?;
        tx.commit().map_err(db("commit replace fingerprint"))?;
        Ok(cleared)
    }

    // -- JSON data -----------------------------------------------------------

    /// Manifest filters last sent by the server for this scope.
    pub fn manifest_filters(&self, scope_key: &str) -> Result<Option<ManifestFilters>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM json_data WHERE key = ?1 AND scope_key = ?2",
                params![MANIFEST_FILTERS_KEY, scope_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db("read manifest filters"))?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn set_manifest_filters(&mut self, scope_key: &str, filters: &ManifestFilters) -> Result<()> {
        let json = serde_json::to_string(filters)?;
        self.conn
            .execute(
                "INSERT INTO json_data (key, value, last_updated, scope_key)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key, scope_key) DO UPDATE SET
                     value = excluded.value, last_updated = excluded.last_updated",
                params![MANIFEST_FILTERS_KEY, json, ts(&Utc::now()), scope_key],
            )
            .map_err(db("write manifest filters"))?;
        Ok(())
    }
}

fn clear_non_embedded(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM updates_assets WHERE update_id IN
             (SELECT id FROM updates WHERE status != ?1)",
        params![UpdateStatus::Embedded.as_str()],
    )
    .map_err(db("clear join rows"))?;
    let cleared = conn
        .execute(
            "DELETE FROM updates WHERE status != ?1",
            params![UpdateStatus::Embedded.as_str()],
        )
        .map_err(db("clear updates"))?;
    Ok(cleared)
}

fn upsert_fingerprint(conn: &Connection, fingerprint: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO build_data (id, fingerprint, recorded_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
             fingerprint = excluded.fingerprint, recorded_at = excluded.recorded_at",
        params![fingerprint, ts(&Utc::now())],
    )
    .map_err(db("write build fingerprint"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

/// Map a row selected with `UPDATE_COLUMNS` to an `Update`.
fn row_to_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<Update> {
    let id_str: String = row.get(0)?;
    let scope_key: String = row.get(1)?;
    let commit_time_str: String = row.get(2)?;
    let runtime_version: String = row.get(3)?;
    let manifest_json: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let last_accessed_str: String = row.get(6)?;
    let successful_launch_count: u32 = row.get(7)?;
    let failed_launch_count: u32 = row.get(8)?;

    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let manifest = serde_json::from_str(&manifest_json).map_err(|e| conversion_err(4, e))?;
    let status = UpdateStatus::from_db_str(&status_str).ok_or_else(|| {
        conversion_err(
            5,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown update status {status_str:?}"),
            ),
        )
    })?;

    Ok(Update {
        id: UpdateId(uuid),
        scope_key,
        commit_time: parse_ts(2, &commit_time_str)?,
        runtime_version,
        manifest,
        status,
        last_accessed: parse_ts(6, &last_accessed_str)?,
        successful_launch_count,
        failed_launch_count,
    })
}

/// Map a row selected with `ASSET_COLUMNS` plus a launch flag to an `Asset`.
fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    let download_time: Option<String> = row.get(5)?;
    let download_time = match download_time {
        Some(s) => Some(parse_ts(5, &s)?),
        None => None,
    };

    Ok(Asset {
        key: row.get(0)?,
        content_type: row.get(1)?,
        expected_hash: row.get(2)?,
        content_hash: row.get(3)?,
        local_path: row.get(4)?,
        download_time,
        is_launch_asset: row.get::<_, i64>(6)? != 0,
    })
}
