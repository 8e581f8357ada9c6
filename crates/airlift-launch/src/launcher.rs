// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Launcher state machine.
//
//   NotStarted --launch_update--> Launching --all assets verified--> Launched
//                                     |
//                                     +--missing file / bad hash / bad manifest--> Failed
//
// Failed is terminal for the launcher instance.  The controller retries with
// a different update on a fresh launcher rather than re-entering this one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use airlift_core::error::{AirliftError, Result};
use airlift_core::manifest::validate_manifest;
use airlift_core::types::{Asset, LaunchedUpdate, Update, UpdateStatus};
use airlift_integrity::{hash_file, verify_file};
use airlift_store::UpdatesDatabase;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Launcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    NotStarted,
    Launching,
    Launched,
    Failed,
}

/// What a launcher exposes to the embedding application.
pub trait AppLauncher {
    fn state(&self) -> LaunchState;

    /// Absolute path of the bundle the host runtime should load.
    fn launch_asset_path(&self) -> Option<&Path>;

    /// Manifest of the launched update.
    fn manifest(&self) -> Option<&Value>;

    fn launched_update(&self) -> Option<&LaunchedUpdate>;

    fn is_using_embedded_assets(&self) -> bool;
}

/// Somewhere a missing asset file can be restored from.
pub trait AssetSource: Send {
    /// Write the asset's bytes to `dest`.  Returns `false` when this source
    /// does not have the asset.
    fn copy_asset(&self, asset: &Asset, dest: &Path) -> Result<bool>;
}

/// Restores assets from the directory the embedded update ships in.
pub struct EmbeddedAssetSource {
    dir: PathBuf,
}

impl EmbeddedAssetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AssetSource for EmbeddedAssetSource {
    fn copy_asset(&self, asset: &Asset, dest: &Path) -> Result<bool> {
        let src = self.dir.join(asset_filename(&asset.key));
        if !src.is_file() {
            return Ok(false);
        }
        if let Some(expected) = asset.verification_hash() {
            if verify_file(&src, expected).is_err() {
                debug!(key = %asset.key, "embedded copy has a different hash");
                return Ok(false);
            }
        }
        std::fs::copy(&src, dest)?;
        debug!(key = %asset.key, "asset restored from embedded bundle");
        Ok(true)
    }
}

/// Filename an asset is stored under inside the assets directory.
pub fn asset_filename(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Launches updates recorded in the store.
pub struct DatabaseLauncher {
    assets_dir: PathBuf,
    asset_source: Option<Box<dyn AssetSource>>,
    state: LaunchState,
    launched: Option<LaunchedUpdate>,
}

impl DatabaseLauncher {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            asset_source: None,
            state: LaunchState::NotStarted,
            launched: None,
        }
    }

    pub fn with_asset_source(mut self, source: Box<dyn AssetSource>) -> Self {
        self.asset_source = Some(source);
        self
    }

    /// Launch `update`.  May only be called once per launcher.
    #[instrument(skip_all, fields(update_id = %update.id))]
    pub fn launch_update(
        &mut self,
        db: &mut UpdatesDatabase,
        update: &Update,
    ) -> Result<&LaunchedUpdate> {
        if self.state != LaunchState::NotStarted {
            return Err(AirliftError::Launch(format!(
                "launcher already used (state {:?})",
                self.state
            )));
        }
        self.state = LaunchState::Launching;

        match self.resolve(db, update) {
            Ok(launched) => {
                self.state = LaunchState::Launched;
                info!(path = %launched.launch_asset_path.display(), "update launched");
                let launched: &LaunchedUpdate = self.launched.insert(launched);
                Ok(launched)
            }
            Err(e) => {
                self.state = LaunchState::Failed;
                warn!(error = %e, "launch failed");
                Err(e)
            }
        }
    }

    fn resolve(&self, db: &mut UpdatesDatabase, update: &Update) -> Result<LaunchedUpdate> {
        validate_manifest(&update.manifest)?;

        let assets = db.assets_for_update(&update.id)?;
        let mut asset_files = HashMap::with_capacity(assets.len());
        let mut missing = Vec::new();
        let mut launch_asset_path = None;
        let mut launch_assets = 0;

        for asset in &assets {
            let Some(path) = self.ensure_asset_file(db, asset)? else {
                missing.push(asset.key.clone());
                continue;
            };
            let Some(expected) = asset.verification_hash() else {
                return Err(AirliftError::Integrity(format!(
                    "asset {} has no hash to verify against",
                    asset.key
                )));
            };
            verify_file(&path, expected)?;

            if asset.is_launch_asset {
                launch_assets += 1;
                launch_asset_path = Some(path.clone());
            }
            asset_files.insert(asset.key.clone(), path);
        }

        if !missing.is_empty() {
            if let Err(e) = db.mark_missing_assets(&missing) {
                warn!(error = %e, "could not demote updates with missing assets");
            }
            return Err(AirliftError::Integrity(format!(
                "update {} is missing {} asset file(s): {}",
                update.id,
                missing.len(),
                missing.join(", ")
            )));
        }

        let launch_asset_path = match (launch_assets, launch_asset_path) {
            (1, Some(path)) => path,
            (n, _) => {
                return Err(AirliftError::Integrity(format!(
                    "update {} has {n} launch assets, expected exactly one",
                    update.id
                )));
            }
        };

        let mut launched = update.clone();
        if !launched.is_embedded() {
            db.mark_update_launchable(&update.id)?;
            launched.status = UpdateStatus::Launchable;
        }
        let now = Utc::now();
        if db.set_last_accessed(&update.id, now)? {
            launched.last_accessed = now;
        }

        Ok(LaunchedUpdate {
            update: launched,
            launch_asset_path,
            asset_files,
        })
    }

    /// Resolve an asset to an existing file, restoring it from the asset
    /// source if needed.  `None` means the file is gone for good.
    fn ensure_asset_file(&self, db: &mut UpdatesDatabase, asset: &Asset) -> Result<Option<PathBuf>> {
        if let Some(rel) = &asset.local_path {
            let path = self.assets_dir.join(rel);
            if path.is_file() {
                return Ok(Some(path));
            }
        }

        let Some(source) = &self.asset_source else {
            return Ok(None);
        };
        let filename = asset
            .local_path
            .clone()
            .unwrap_or_else(|| asset_filename(&asset.key));
        let dest = self.assets_dir.join(&filename);
        if !source.copy_asset(asset, &dest)? {
            return Ok(None);
        }

        let hash = hash_file(&dest)?;
        db.set_asset_file(&asset.key, &filename, &hash, Utc::now())?;
        Ok(Some(dest))
    }
}

impl AppLauncher for DatabaseLauncher {
    fn state(&self) -> LaunchState {
        self.state
    }

    fn launch_asset_path(&self) -> Option<&Path> {
        self.launched
            .as_ref()
            .map(|l| l.launch_asset_path.as_path())
    }

    fn manifest(&self) -> Option<&Value> {
        self.launched.as_ref().map(|l| &l.update.manifest)
    }

    fn launched_update(&self) -> Option<&LaunchedUpdate> {
        self.launched.as_ref()
    }

    fn is_using_embedded_assets(&self) -> bool {
        self.launched
            .as_ref()
            .is_some_and(|l| l.update.is_embedded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::manifest::parse_manifest;
    use airlift_core::types::UpdateId;
    use airlift_integrity::hash_bytes;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        assets_dir: PathBuf,
        db: UpdatesDatabase,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets_dir = dir.path().join("assets");
        std::fs::create_dir_all(&assets_dir).unwrap();
        Fixture {
            _dir: dir,
            assets_dir,
            db: UpdatesDatabase::open_in_memory().expect("open"),
        }
    }

    fn manifest(bundle: &[u8], logo: &[u8]) -> Value {
        json!({
            "id": UpdateId::new().to_string(),
            "createdAt": "2026-03-01T12:00:00Z",
            "runtimeVersion": "1.0",
            "launchAsset": { "key": "bundle-abc", "hash": hash_bytes(bundle), "contentType": "application/javascript" },
            "assets": [ { "key": "logo-def", "hash": hash_bytes(logo), "contentType": "image/png" } ],
        })
    }

    /// Store an update whose files are written to disk.
    fn store_downloaded(fx: &mut Fixture, bundle: &[u8], logo: &[u8]) -> Update {
        let (mut update, mut assets) = parse_manifest(&manifest(bundle, logo), "@acme/app").unwrap();
        for (asset, bytes) in assets.iter_mut().zip([bundle, logo]) {
            let name = asset_filename(&asset.key);
            std::fs::write(fx.assets_dir.join(&name), bytes).unwrap();
            asset.local_path = Some(name);
            asset.content_hash = Some(hash_bytes(bytes));
        }
        update.status = UpdateStatus::Ready;
        fx.db.add_update(&update, &assets).unwrap();
        update
    }

    #[test]
    fn launches_verified_update() {
        let mut fx = fixture();
        let update = store_downloaded(&mut fx, b"console.log(1)", b"png");

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        let launched = launcher.launch_update(&mut fx.db, &update).expect("launch");
        assert_eq!(launched.update.id, update.id);
        assert_eq!(launched.launch_asset_path, fx.assets_dir.join("bundle-abc"));
        assert_eq!(launched.asset_files.len(), 2);

        assert_eq!(launcher.state(), LaunchState::Launched);
        assert_eq!(launcher.manifest(), Some(&update.manifest));
        assert!(!launcher.is_using_embedded_assets());
        assert_eq!(
            fx.db.update(&update.id).unwrap().unwrap().status,
            UpdateStatus::Launchable
        );
    }

    #[test]
    fn missing_local_path_fails_with_integrity_error() {
        let mut fx = fixture();
        let update = Update::new(
            UpdateId::new(),
            "@acme/app",
            Utc::now(),
            "1.0",
            manifest(b"b", b"l"),
        );
        let mut bundle = Asset::new("bundle-abc", "application/javascript");
        bundle.is_launch_asset = true;
        bundle.expected_hash = Some(hash_bytes(b"b"));
        fx.db.add_update(&update, &[bundle]).unwrap();

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        let err = launcher.launch_update(&mut fx.db, &update).unwrap_err();
        assert!(matches!(err, AirliftError::Integrity(_)));
        assert_eq!(launcher.state(), LaunchState::Failed);
        assert!(launcher.launched_update().is_none());
        assert!(launcher.launch_asset_path().is_none());
    }

    #[test]
    fn tampered_file_fails_and_state_is_terminal() {
        let mut fx = fixture();
        let update = store_downloaded(&mut fx, b"console.log(1)", b"png");
        std::fs::write(fx.assets_dir.join("logo-def"), b"tampered").unwrap();

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        let err = launcher.launch_update(&mut fx.db, &update).unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(launcher.state(), LaunchState::Failed);

        // A failed launcher never launches anything, even a good update.
        let err = launcher.launch_update(&mut fx.db, &update).unwrap_err();
        assert!(matches!(err, AirliftError::Launch(_)));
        assert_eq!(launcher.state(), LaunchState::Failed);
    }

    #[test]
    fn second_launch_is_rejected_and_identity_kept() {
        let mut fx = fixture();
        let first = store_downloaded(&mut fx, b"one", b"logo");
        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        launcher.launch_update(&mut fx.db, &first).expect("launch");

        let second = store_downloaded(&mut fx, b"two", b"logo2");
        assert!(launcher.launch_update(&mut fx.db, &second).is_err());
        assert_eq!(launcher.launched_update().unwrap().update.id, first.id);
        assert_eq!(launcher.state(), LaunchState::Launched);
    }

    #[test]
    fn deleted_file_demotes_update_to_pending() {
        let mut fx = fixture();
        let update = store_downloaded(&mut fx, b"bundle", b"logo");
        std::fs::remove_file(fx.assets_dir.join("logo-def")).unwrap();

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        assert!(launcher.launch_update(&mut fx.db, &update).is_err());
        assert_eq!(
            fx.db.update(&update.id).unwrap().unwrap().status,
            UpdateStatus::Pending
        );
    }

    #[test]
    fn missing_file_restored_from_asset_source() {
        let mut fx = fixture();
        let update = store_downloaded(&mut fx, b"bundle", b"logo");
        std::fs::remove_file(fx.assets_dir.join("logo-def")).unwrap();

        let embedded = tempfile::tempdir().unwrap();
        std::fs::write(embedded.path().join("logo-def"), b"logo").unwrap();

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir)
            .with_asset_source(Box::new(EmbeddedAssetSource::new(embedded.path())));
        launcher.launch_update(&mut fx.db, &update).expect("launch");
        assert!(fx.assets_dir.join("logo-def").is_file());
    }

    #[test]
    fn invalid_manifest_fails() {
        let mut fx = fixture();
        let mut update = store_downloaded(&mut fx, b"bundle", b"logo");
        update.manifest = json!({ "id": update.id.to_string() });

        let mut launcher = DatabaseLauncher::new(&fx.assets_dir);
        let err = launcher.launch_update(&mut fx.db, &update).unwrap_err();
        assert!(matches!(err, AirliftError::Integrity(_)));
    }

    #[test]
    fn asset_filenames_are_flat() {
        assert_eq!(asset_filename("bundle-abc.js"), "bundle-abc.js");
        assert_eq!(asset_filename("../etc/passwd"), ".._etc_passwd");
    }
}
