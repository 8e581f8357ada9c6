// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reaper — reclaims store rows and disk space held by updates that can never
// be selected again.
//
// Rows go first, in one store transaction; files go after the commit.  A
// crash between the two leaves files no row points at, which the stray-file
// sweep of a later run removes.  Downloads and patches write their files
// before any row names them, so the sweep only takes unreferenced files older
// than a grace period.  Running twice in a row deletes nothing the second
// time.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

use airlift_core::error::Result;
use airlift_core::types::Update;
use airlift_store::UpdatesDatabase;
use tracing::{debug, info, instrument, warn};

use crate::selection::SelectionPolicy;

/// Unreferenced files younger than this are assumed to belong to a download
/// or patch still in progress.
pub const STRAY_FILE_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

/// What one reap run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub updates_deleted: usize,
    pub assets_deleted: usize,
    pub files_removed: usize,
    /// Files in the assets directory no asset row referenced.
    pub stray_files_removed: usize,
    /// File removals that failed; retried on the next run.
    pub file_errors: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.updates_deleted == 0
            && self.assets_deleted == 0
            && self.files_removed == 0
            && self.stray_files_removed == 0
    }
}

/// Delete every update of `scope_key` outside the retained set, the assets
/// no remaining update references, and their files.  Unreferenced files are
/// swept once they are older than `stray_grace`.
#[instrument(skip_all, fields(scope_key = %scope_key))]
pub fn reap_unused_updates(
    db: &mut UpdatesDatabase,
    assets_dir: &Path,
    policy: &SelectionPolicy,
    scope_key: &str,
    launched: Option<&Update>,
    stray_grace: Duration,
) -> Result<ReapReport> {
    let all = db.all_updates_for_scope(scope_key, true)?;
    let doomed = policy.updates_to_delete(&all, launched);
    let deleted_assets = db.delete_updates_and_orphaned_assets(&doomed)?;

    let mut report = ReapReport {
        updates_deleted: doomed.len(),
        assets_deleted: deleted_assets.len(),
        ..ReapReport::default()
    };

    for asset in &deleted_assets {
        let Some(rel) = &asset.local_path else {
            continue;
        };
        match std::fs::remove_file(assets_dir.join(rel)) {
            Ok(()) => report.files_removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key = %asset.key, error = %e, "failed to remove asset file");
                report.file_errors += 1;
            }
        }
    }

    sweep_stray_files(db, assets_dir, stray_grace, &mut report)?;

    if report.is_empty() {
        debug!("nothing to reap");
    } else {
        info!(
            updates = report.updates_deleted,
            assets = report.assets_deleted,
            files = report.files_removed + report.stray_files_removed,
            "reaped unused updates"
        );
    }
    Ok(report)
}

fn sweep_stray_files(
    db: &UpdatesDatabase,
    assets_dir: &Path,
    grace: Duration,
    report: &mut ReapReport,
) -> Result<()> {
    let Some(cutoff) = SystemTime::now().checked_sub(grace) else {
        return Ok(());
    };
    let referenced: HashSet<String> = db
        .all_assets()?
        .into_iter()
        .filter_map(|a| a.local_path)
        .collect();

    let entries = match std::fs::read_dir(assets_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if referenced.contains(&name) {
            continue;
        }
        // No readable mtime means no proof the file is abandoned.
        let abandoned = entry
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|modified| modified <= cutoff);
        if !abandoned {
            debug!(file = %name, "unreferenced file within grace period");
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(file = %name, "removed stray file");
                report.stray_files_removed += 1;
            }
            Err(e) => {
                warn!(file = %name, error = %e, "failed to remove stray file");
                report.file_errors += 1;
            }
        }
    }
    Ok(())
}
