// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Materialise an asset from a binary patch against an asset already on disk.

use std::path::Path;

use airlift_core::error::{AirliftError, Result};
use airlift_core::types::Asset;
use airlift_integrity::apply_patch_verified;
use airlift_store::UpdatesDatabase;
use chrono::Utc;
use tracing::{info, instrument};

use crate::launcher::asset_filename;

/// Apply `patch` to the stored file of `base_key` and write the result as
/// `target`.
///
/// The output is accepted only if it hashes to `target.expected_hash`.  The
/// file is written under a temporary name and renamed into place, so a crash
/// never leaves a half-written asset under its final name.  Returns `target`
/// with its local file fields filled in; if a row for the target key already
/// exists it is updated as well.
#[instrument(skip(db, assets_dir, target, patch), fields(target = %target.key, patch_len = patch.len()))]
pub fn apply_asset_patch(
    db: &mut UpdatesDatabase,
    assets_dir: &Path,
    base_key: &str,
    target: &Asset,
    patch: &[u8],
) -> Result<Asset> {
    let expected = target.expected_hash.as_deref().ok_or_else(|| {
        AirliftError::Patch(format!("target asset {} has no expected hash", target.key))
    })?;

    let base = db
        .asset(base_key)?
        .ok_or_else(|| AirliftError::Patch(format!("base asset {base_key} not found")))?;
    let base_rel = base.local_path.as_deref().ok_or_else(|| {
        AirliftError::Patch(format!("base asset {base_key} has no local file"))
    })?;
    let old = std::fs::read(assets_dir.join(base_rel))?;

    let new = apply_patch_verified(&old, patch, expected)?;

    let filename = asset_filename(&target.key);
    let tmp = assets_dir.join(format!("{filename}.tmp"));
    std::fs::write(&tmp, &new)?;
    std::fs::rename(&tmp, assets_dir.join(&filename))?;

    let mut patched = target.clone();
    let now = Utc::now();
    patched.local_path = Some(filename.clone());
    patched.content_hash = Some(expected.to_ascii_lowercase());
    patched.download_time = Some(now);

    if db.asset(&target.key)?.is_some() {
        db.set_asset_file(&target.key, &filename, expected, now)?;
    }

    info!(base = base_key, bytes = new.len(), "asset patched");
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::types::{Update, UpdateId};
    use airlift_integrity::{create_patch, hash_bytes};
    use serde_json::json;

    const OLD: &[u8] = b"console.log('release 1');";
    const NEW: &[u8] = b"console.log('release 2'); // with fixes";

    fn setup() -> (tempfile::TempDir, UpdatesDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = UpdatesDatabase::open_in_memory().unwrap();
        std::fs::write(dir.path().join("bundle-1"), OLD).unwrap();

        let update = Update::new(UpdateId::new(), "@acme/app", Utc::now(), "1.0", json!({}));
        let mut base = Asset::new("bundle-1", "application/javascript");
        base.local_path = Some("bundle-1".into());
        base.content_hash = Some(hash_bytes(OLD));
        base.is_launch_asset = true;
        db.add_update(&update, &[base]).unwrap();
        (dir, db)
    }

    fn target() -> Asset {
        let mut target = Asset::new("bundle-2", "application/javascript");
        target.expected_hash = Some(hash_bytes(NEW));
        target.is_launch_asset = true;
        target
    }

    #[test]
    fn patched_asset_is_written_and_described() {
        let (dir, mut db) = setup();
        let patch = create_patch(OLD, NEW);

        let patched = apply_asset_patch(&mut db, dir.path(), "bundle-1", &target(), &patch)
            .expect("patch");
        assert_eq!(patched.local_path.as_deref(), Some("bundle-2"));
        assert_eq!(patched.content_hash, Some(hash_bytes(NEW)));
        assert_eq!(std::fs::read(dir.path().join("bundle-2")).unwrap(), NEW);
        assert!(!dir.path().join("bundle-2.tmp").exists());
    }

    #[test]
    fn hash_mismatch_writes_nothing() {
        let (dir, mut db) = setup();
        let patch = create_patch(OLD, b"something else entirely");

        let err = apply_asset_patch(&mut db, dir.path(), "bundle-1", &target(), &patch)
            .unwrap_err();
        assert!(matches!(err, AirliftError::Patch(_)));
        assert!(!dir.path().join("bundle-2").exists());
    }

    #[test]
    fn unknown_base_is_patch_error() {
        let (dir, mut db) = setup();
        let patch = create_patch(OLD, NEW);
        let err = apply_asset_patch(&mut db, dir.path(), "nope", &target(), &patch).unwrap_err();
        assert!(matches!(err, AirliftError::Patch(_)));
    }

    #[test]
    fn target_without_hash_is_rejected() {
        let (dir, mut db) = setup();
        let mut target = target();
        target.expected_hash = None;
        let err = apply_asset_patch(&mut db, dir.path(), "bundle-1", &target, b"").unwrap_err();
        assert!(matches!(err, AirliftError::Patch(_)));
    }
}
