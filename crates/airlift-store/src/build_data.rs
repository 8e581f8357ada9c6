// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Build-data guard.
//
// Downloaded updates are only valid for the native build that fetched them.
// When the host app is reinstalled with a different version or update
// configuration, everything downloaded for the old build is dropped before
// selection runs.

use airlift_core::error::Result;
use airlift_core::types::BuildData;
use tracing::{info, instrument};

use crate::database::UpdatesDatabase;

/// Outcome of comparing the running build against the stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDataCheck {
    /// No fingerprint was stored; the current one has been recorded.
    FirstRun,
    /// Stored and current fingerprints match; nothing changed.
    Unchanged,
    /// The build changed; `cleared` non-embedded updates were deleted.
    Reset { cleared: usize },
}

/// Make the store consistent with the running build.
///
/// Must run before any selection query.  Clearing and recording the new
/// fingerprint happen in one transaction.
#[instrument(skip_all, fields(fingerprint = %current.fingerprint()))]
pub fn ensure_consistency(db: &mut UpdatesDatabase, current: &BuildData) -> Result<BuildDataCheck> {
    let fingerprint = current.fingerprint();

    match db.build_fingerprint()? {
        None => {
            db.set_build_fingerprint(&fingerprint)?;
            info!("build fingerprint recorded");
            Ok(BuildDataCheck::FirstRun)
        }
        Some(stored) if stored == fingerprint => Ok(BuildDataCheck::Unchanged),
        Some(stored) => {
            let cleared = db.replace_build_fingerprint(&fingerprint)?;
            info!(previous = %stored, cleared, "build changed, downloaded updates cleared");
            Ok(BuildDataCheck::Reset { cleared })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::types::{Update, UpdateId, UpdateStatus};
    use chrono::Utc;
    use serde_json::json;

    fn build(version: &str) -> BuildData {
        BuildData {
            app_id: "com.acme.app".into(),
            bundle_version: version.into(),
            config_hash: "cfg".into(),
        }
    }

    fn add(db: &mut UpdatesDatabase, status: UpdateStatus) -> UpdateId {
        let mut update = Update::new(UpdateId::new(), "@acme/app", Utc::now(), "1.0", json!({}));
        update.status = status;
        db.add_update(&update, &[]).expect("add update");
        update.id
    }

    #[test]
    fn first_run_records_fingerprint() {
        let mut db = UpdatesDatabase::open_in_memory().expect("open");
        add(&mut db, UpdateStatus::Ready);

        assert_eq!(
            ensure_consistency(&mut db, &build("A")).unwrap(),
            BuildDataCheck::FirstRun
        );
        assert_eq!(db.build_fingerprint().unwrap(), Some(build("A").fingerprint()));
        assert_eq!(db.all_updates().unwrap().len(), 1);
    }

    #[test]
    fn same_build_keeps_updates() {
        let mut db = UpdatesDatabase::open_in_memory().expect("open");
        ensure_consistency(&mut db, &build("A")).unwrap();
        add(&mut db, UpdateStatus::Ready);

        assert_eq!(
            ensure_consistency(&mut db, &build("A")).unwrap(),
            BuildDataCheck::Unchanged
        );
        assert_eq!(db.all_updates().unwrap().len(), 1);
    }

    #[test]
    fn new_build_clears_downloaded_updates() {
        let mut db = UpdatesDatabase::open_in_memory().expect("open");
        ensure_consistency(&mut db, &build("A")).unwrap();
        let embedded = add(&mut db, UpdateStatus::Embedded);
        add(&mut db, UpdateStatus::Ready);
        add(&mut db, UpdateStatus::Launchable);

        assert_eq!(
            ensure_consistency(&mut db, &build("B")).unwrap(),
            BuildDataCheck::Reset { cleared: 2 }
        );
        assert_eq!(db.build_fingerprint().unwrap(), Some(build("B").fingerprint()));

        let left = db.all_updates().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, embedded);

        // Running again against the same build is a no-op.
        assert_eq!(
            ensure_consistency(&mut db, &build("B")).unwrap(),
            BuildDataCheck::Unchanged
        );
    }
}
