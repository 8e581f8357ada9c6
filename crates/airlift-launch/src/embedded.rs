// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The update shipped inside the app binary.
//
// The embedded directory holds a manifest plus one file per asset, named by
// `asset_filename(key)`.  The embedded update is installed into the store on
// every start so that it goes through the same selection and verification as
// downloaded updates; the emergency launcher reads it directly instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use airlift_core::error::{AirliftError, Result};
use airlift_core::manifest::parse_manifest;
use airlift_core::types::{Asset, LaunchedUpdate, Update, UpdateStatus};
use airlift_integrity::{hash_file, verify_file};
use airlift_store::UpdatesDatabase;
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::launcher::asset_filename;

/// Build-time update and the directory its files live in.
#[derive(Debug, Clone)]
pub struct EmbeddedUpdate {
    update: Update,
    assets: Vec<Asset>,
    dir: PathBuf,
}

impl EmbeddedUpdate {
    /// Read and parse `dir/manifest_file`.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load(dir: impl AsRef<Path>, manifest_file: &str, scope_key: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(dir.join(manifest_file))?;
        let manifest: serde_json::Value = serde_json::from_str(&raw)?;
        let (mut update, assets) = parse_manifest(&manifest, scope_key)?;
        update.status = UpdateStatus::Embedded;

        debug!(update_id = %update.id, assets = assets.len(), "embedded manifest loaded");
        Ok(Self { update, assets, dir })
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where an asset's file lives inside the embedded directory.
    pub fn asset_path(&self, asset: &Asset) -> PathBuf {
        self.dir.join(asset_filename(&asset.key))
    }

    /// Serve the embedded files in place, without the store.
    pub fn launched_update(&self) -> LaunchedUpdate {
        let asset_files: HashMap<String, PathBuf> = self
            .assets
            .iter()
            .map(|a| (a.key.clone(), self.asset_path(a)))
            .collect();
        let launch_asset_path = self
            .assets
            .iter()
            .find(|a| a.is_launch_asset)
            .map(|a| self.asset_path(a))
            .unwrap_or_else(|| self.dir.clone());

        LaunchedUpdate {
            update: self.update.clone(),
            launch_asset_path,
            asset_files,
        }
    }

    /// Copy the embedded files into `assets_dir` and record the update in the
    /// store with status `Embedded`.  Idempotent.
    #[instrument(skip_all, fields(update_id = %self.update.id))]
    pub fn install(&self, db: &mut UpdatesDatabase, assets_dir: &Path) -> Result<()> {
        let mut installed = Vec::with_capacity(self.assets.len());
        let mut copied = 0;

        for asset in &self.assets {
            let filename = asset_filename(&asset.key);
            let dest = assets_dir.join(&filename);
            let expected = asset.expected_hash.as_deref();
            let present = dest.is_file() && expected.is_none_or(|h| verify_file(&dest, h).is_ok());
            if !present {
                let src = self.asset_path(asset);
                if !src.is_file() {
                    return Err(AirliftError::Integrity(format!(
                        "embedded asset {} missing from {}",
                        asset.key,
                        self.dir.display()
                    )));
                }
                if let Some(expected) = expected {
                    verify_file(&src, expected)?;
                }
                std::fs::copy(&src, &dest)?;
                copied += 1;
            }

            let mut asset = asset.clone();
            asset.content_hash = Some(hash_file(&dest)?);
            asset.local_path = Some(filename);
            asset.download_time = Some(Utc::now());
            installed.push(asset);
        }

        db.add_update(&self.update, &installed)?;
        if copied > 0 {
            info!(copied, "embedded assets installed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use airlift_integrity::hash_bytes;
    use serde_json::json;

    pub(crate) const BUNDLE: &[u8] = b"console.log('embedded')";
    pub(crate) const LOGO: &[u8] = b"\x89PNG embedded";

    /// Write an embedded update directory and return its manifest id.
    pub(crate) fn write_embedded(dir: &Path, runtime: &str) -> String {
        write_embedded_at(dir, runtime, "2026-01-01T00:00:00Z")
    }

    /// Same, with an explicit commit time.  Replaces any earlier manifest.
    pub(crate) fn write_embedded_at(dir: &Path, runtime: &str, created_at: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let manifest = json!({
            "id": id,
            "createdAt": created_at,
            "runtimeVersion": runtime,
            "launchAsset": { "key": "embedded-bundle", "hash": hash_bytes(BUNDLE), "contentType": "application/javascript" },
            "assets": [ { "key": "embedded-logo", "hash": hash_bytes(LOGO), "contentType": "image/png" } ],
        });
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("app.manifest"), manifest.to_string()).unwrap();
        std::fs::write(dir.join("embedded-bundle"), BUNDLE).unwrap();
        std::fs::write(dir.join("embedded-logo"), LOGO).unwrap();
        id
    }

    #[test]
    fn load_marks_update_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let id = write_embedded(dir.path(), "1.0");

        let embedded = EmbeddedUpdate::load(dir.path(), "app.manifest", "@acme/app").unwrap();
        assert_eq!(embedded.update().id.to_string(), id);
        assert_eq!(embedded.update().status, UpdateStatus::Embedded);
        assert_eq!(embedded.assets().len(), 2);

        let launched = embedded.launched_update();
        assert_eq!(launched.launch_asset_path, dir.path().join("embedded-bundle"));
    }

    #[test]
    fn load_without_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EmbeddedUpdate::load(dir.path(), "app.manifest", "@acme/app").unwrap_err();
        assert!(matches!(err, AirliftError::Io(_)));
    }

    #[test]
    fn install_is_idempotent() {
        let embedded_dir = tempfile::tempdir().unwrap();
        let assets_dir = tempfile::tempdir().unwrap();
        write_embedded(embedded_dir.path(), "1.0");
        let embedded =
            EmbeddedUpdate::load(embedded_dir.path(), "app.manifest", "@acme/app").unwrap();
        let mut db = UpdatesDatabase::open_in_memory().unwrap();

        embedded.install(&mut db, assets_dir.path()).unwrap();
        embedded.install(&mut db, assets_dir.path()).unwrap();

        let stored = db.update(&embedded.update().id).unwrap().unwrap();
        assert_eq!(stored.status, UpdateStatus::Embedded);
        let assets = db.assets_for_update(&stored.id).unwrap();
        assert_eq!(assets.len(), 2);
        assert!(assets.iter().all(|a| a.local_path.is_some()));
        assert_eq!(
            std::fs::read(assets_dir.path().join("embedded-bundle")).unwrap(),
            BUNDLE
        );
    }

    #[test]
    fn install_rejects_corrupt_embedded_file() {
        let embedded_dir = tempfile::tempdir().unwrap();
        let assets_dir = tempfile::tempdir().unwrap();
        write_embedded(embedded_dir.path(), "1.0");
        std::fs::write(embedded_dir.path().join("embedded-logo"), b"corrupt").unwrap();
        let embedded =
            EmbeddedUpdate::load(embedded_dir.path(), "app.manifest", "@acme/app").unwrap();
        let mut db = UpdatesDatabase::open_in_memory().unwrap();

        let err = embedded.install(&mut db, assets_dir.path()).unwrap_err();
        assert!(err.is_integrity());
        assert!(db.update(&embedded.update().id).unwrap().is_none());
    }
}
