// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup controller — the single owner of the update store.
//
// Startup runs strictly in order: open store (migrations) -> build-data guard
// -> install embedded update -> select -> launch.  Every failure on that path
// ends in a launched app: a bad update is excluded and selection runs again,
// and a broken store or configuration falls through to the emergency
// launcher.  The reaper runs afterwards on a blocking task.
//
// The store is `Send` but not `Sync`, so it lives in an `Arc<Mutex<>>` that
// the reaper task shares.  All operations are short SQLite transactions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use airlift_core::config::UpdatesConfig;
use airlift_core::diagnostics::ErrorReport;
use airlift_core::error::{AirliftError, Result};
use airlift_core::types::{Asset, BuildData, LaunchedUpdate, ManifestFilters, Update, UpdateId};
use airlift_integrity::{AuditLog, hash_bytes};
use airlift_store::{BuildDataCheck, UpdatesDatabase, ensure_consistency};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::embedded::EmbeddedUpdate;
use crate::emergency::EmergencyLauncher;
use crate::launcher::{AppLauncher, DatabaseLauncher, EmbeddedAssetSource};
use crate::patching;
use crate::reaper::{ReapReport, STRAY_FILE_GRACE, reap_unused_updates};
use crate::recovery::{Recovery, classify_error};
use crate::selection::SelectionPolicy;

const DATABASE_FILE: &str = "updates.db";
const AUDIT_FILE: &str = "events.db";
const ASSETS_DIR: &str = "assets";

enum ActiveLauncher {
    Database(DatabaseLauncher),
    /// Updates are disabled.
    Embedded(EmergencyLauncher),
    Emergency(EmergencyLauncher),
}

impl ActiveLauncher {
    fn as_launcher(&self) -> &dyn AppLauncher {
        match self {
            Self::Database(l) => l,
            Self::Embedded(l) | Self::Emergency(l) => l,
        }
    }
}

/// Optional audit trail shared with the reaper task.  Recording never fails
/// the caller; errors are logged.
#[derive(Clone, Default)]
struct Audit(Option<Arc<Mutex<AuditLog>>>);

impl Audit {
    fn open(config: &UpdatesConfig, dir: &Path) -> Self {
        if !config.audit_enabled {
            return Self::default();
        }
        match AuditLog::open(dir.join(AUDIT_FILE)) {
            Ok(log) => Self(Some(Arc::new(Mutex::new(log)))),
            Err(e) => {
                warn!(error = %e, "audit log unavailable");
                Self::default()
            }
        }
    }

    fn record(&self, action: &str, update_id: Option<&UpdateId>, success: bool, details: Option<&str>) {
        let Some(log) = &self.0 else {
            return;
        };
        let result = match log.lock() {
            Ok(log) => log.record(action, update_id, success, details),
            Err(_) => Err(AirliftError::Database("audit log lock poisoned".into())),
        };
        if let Err(e) = result {
            warn!(action, error = %e, "failed to record audit entry");
        }
    }

    fn purge(&self, retention_hours: u32) {
        let Some(log) = &self.0 else {
            return;
        };
        let max_age = chrono::Duration::hours(i64::from(retention_hours));
        let result = match log.lock() {
            Ok(log) => log.purge_older_than(max_age).map(|_| ()),
            Err(_) => Err(AirliftError::Database("audit log lock poisoned".into())),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to purge audit log");
        }
    }
}

/// Owns the store, the launcher that served this process, and everything the
/// host app may ask about the running update.
pub struct UpdatesController {
    config: UpdatesConfig,
    policy: SelectionPolicy,
    assets_dir: PathBuf,
    store: Option<Arc<Mutex<UpdatesDatabase>>>,
    audit: Audit,
    launcher: ActiveLauncher,
    error: Option<AirliftError>,
}

impl UpdatesController {
    /// Run the startup sequence.  Always ends with a launched update.
    #[instrument(skip_all, fields(scope_key = %config.scope_key))]
    pub fn start(config: UpdatesConfig, embedded: &EmbeddedUpdate) -> Self {
        let policy =
            SelectionPolicy::new(config.runtime_version.clone()).with_embedded(embedded.update().id);

        if !config.enabled {
            let launcher = ActiveLauncher::Embedded(EmergencyLauncher::launch_embedded(embedded));
            return Self::without_store(config, policy, launcher);
        }

        let (mut db, dir, check) = match prepare_store(&config, embedded) {
            Ok(prepared) => prepared,
            Err(e) => {
                let launcher =
                    ActiveLauncher::Emergency(EmergencyLauncher::launch_with_fatal_error(embedded, e));
                return Self::without_store(config, policy, launcher);
            }
        };

        let audit = Audit::open(&config, &dir);
        if let BuildDataCheck::Reset { cleared } = check {
            audit.record(
                "build_data_reset",
                None,
                true,
                Some(&format!("{cleared} downloaded updates cleared")),
            );
        }

        let assets_dir = dir.join(ASSETS_DIR);
        let (launcher, error) =
            select_and_launch(&policy, &config.scope_key, &mut db, &assets_dir, embedded, &audit);

        Self {
            config,
            policy,
            assets_dir,
            store: Some(Arc::new(Mutex::new(db))),
            audit,
            launcher,
            error,
        }
    }

    fn without_store(config: UpdatesConfig, policy: SelectionPolicy, launcher: ActiveLauncher) -> Self {
        Self {
            config,
            policy,
            assets_dir: PathBuf::new(),
            store: None,
            audit: Audit::default(),
            launcher,
            error: None,
        }
    }

    // -- Launch result -------------------------------------------------------

    pub fn launcher(&self) -> &dyn AppLauncher {
        self.launcher.as_launcher()
    }

    /// Bundle file the host runtime should load.
    pub fn launch_asset_path(&self) -> Option<&Path> {
        self.launcher().launch_asset_path()
    }

    /// Manifest of the running update.
    pub fn manifest(&self) -> Option<&Value> {
        self.launcher().manifest()
    }

    pub fn launched_update(&self) -> Option<&LaunchedUpdate> {
        self.launcher().launched_update()
    }

    pub fn is_emergency_launch(&self) -> bool {
        matches!(self.launcher, ActiveLauncher::Emergency(_))
    }

    pub fn is_using_embedded_assets(&self) -> bool {
        self.launcher().is_using_embedded_assets()
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// Drain the error that caused a fallback during startup, if any.
    /// Returns it once, then `None`.
    pub fn consume_error(&mut self) -> Option<AirliftError> {
        match &mut self.launcher {
            ActiveLauncher::Emergency(l) => l.consume_error().or_else(|| self.error.take()),
            _ => self.error.take(),
        }
    }

    /// `consume_error`, packaged for telemetry upload.
    pub fn consume_error_report(&mut self) -> Option<ErrorReport> {
        let launched = self.launched_update().map(|l| l.update.id);
        self.consume_error()
            .map(|e| ErrorReport::from_error(&e, launched))
    }

    // -- Store operations ----------------------------------------------------

    fn lock_store(&self) -> Result<MutexGuard<'_, UpdatesDatabase>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AirliftError::Launch("update store is not available".into()))?;
        store
            .lock()
            .map_err(|_| AirliftError::Database("store lock poisoned".into()))
    }

    /// Whether `new` should replace the running update on the next launch.
    pub fn should_load_new_update(&self, new: &Update) -> Result<bool> {
        let filters = match self.store {
            Some(_) => self.lock_store()?.manifest_filters(&self.config.scope_key)?,
            None => None,
        };
        Ok(self.policy.should_load_new_update(
            new,
            self.launched_update().map(|l| &l.update),
            filters.as_ref(),
        ))
    }

    /// Record an update whose asset files have all been written to the
    /// assets directory, and mark it ready for the next launch.
    #[instrument(skip_all, fields(update_id = %update.id))]
    pub fn add_downloaded_update(&self, update: &Update, assets: &[Asset]) -> Result<()> {
        let result = {
            let mut db = self.lock_store()?;
            db.add_update(update, assets)
                .and_then(|()| db.mark_update_ready(&update.id))
        };
        let details = result.as_ref().err().map(ToString::to_string);
        self.audit
            .record("download", Some(&update.id), result.is_ok(), details.as_deref());
        result
    }

    pub fn set_manifest_filters(&self, filters: &ManifestFilters) -> Result<()> {
        self.lock_store()?
            .set_manifest_filters(&self.config.scope_key, filters)
    }

    /// Build `target` from a patch against the stored asset `base_key`.
    pub fn apply_asset_patch(&self, base_key: &str, target: &Asset, patch: &[u8]) -> Result<Asset> {
        let result = {
            let mut db = self.lock_store()?;
            patching::apply_asset_patch(&mut db, &self.assets_dir, base_key, target, patch)
        };
        let details = match &result {
            Ok(_) => format!("{base_key} -> {}", target.key),
            Err(e) => e.to_string(),
        };
        self.audit.record("patch", None, result.is_ok(), Some(&details));
        result
    }

    fn database_launch_id(&self) -> Option<UpdateId> {
        match &self.launcher {
            ActiveLauncher::Database(l) => l.launched_update().map(|l| l.update.id),
            _ => None,
        }
    }

    /// The host app ran the launched update without crashing.  No-op unless
    /// the update came from the store.
    pub fn mark_successful_launch(&self) -> Result<()> {
        let Some(id) = self.database_launch_id() else {
            return Ok(());
        };
        self.lock_store()?.increment_successful_launch_count(&id)?;
        self.audit.record("launch_succeeded", Some(&id), true, None);
        Ok(())
    }

    /// The launched update crashed the host app.  An update that never
    /// succeeded is skipped by selection from then on.
    pub fn mark_failed_launch(&self) -> Result<()> {
        let Some(id) = self.database_launch_id() else {
            return Ok(());
        };
        self.lock_store()?.increment_failed_launch_count(&id)?;
        self.audit.record("launch_failed", Some(&id), false, None);
        Ok(())
    }

    /// Reap unused updates on a blocking task.  Must be called from within a
    /// Tokio runtime.  Returns `None` when the launch did not come from the
    /// store.
    pub fn spawn_reaper(&self) -> Option<JoinHandle<Result<ReapReport>>> {
        let launched = match &self.launcher {
            ActiveLauncher::Database(l) => l.launched_update()?.update.clone(),
            _ => return None,
        };
        let store = Arc::clone(self.store.as_ref()?);
        let audit = self.audit.clone();
        let assets_dir = self.assets_dir.clone();
        let policy = self.policy.clone();
        let scope_key = self.config.scope_key.clone();
        let retention_hours = self.config.event_retention_hours;

        Some(tokio::task::spawn_blocking(move || {
            let result = match store.lock() {
                Ok(mut db) => reap_unused_updates(
                    &mut db,
                    &assets_dir,
                    &policy,
                    &scope_key,
                    Some(&launched),
                    STRAY_FILE_GRACE,
                ),
                Err(_) => Err(AirliftError::Database("store lock poisoned".into())),
            };
            match &result {
                Ok(report) => audit.record(
                    "reap",
                    None,
                    true,
                    Some(&format!(
                        "{} updates, {} assets removed",
                        report.updates_deleted, report.assets_deleted
                    )),
                ),
                Err(e) => {
                    error!(error = %e, "reaper failed, will retry on next launch");
                    audit.record("reap", None, false, Some(&e.to_string()));
                }
            }
            audit.purge(retention_hours);
            result
        }))
    }

    /// Release the store.  Await any reaper handle first; while it runs the
    /// store is still shared and this fails without closing it.
    pub fn shutdown(self) -> Result<()> {
        let Some(store) = self.store else {
            return Ok(());
        };
        let store = Arc::try_unwrap(store)
            .map_err(|_| AirliftError::Launch("update store is still in use by the reaper".into()))?;
        let db = store
            .into_inner()
            .map_err(|_| AirliftError::Database("store lock poisoned".into()))?;
        db.close()?;
        info!("updates controller shut down");
        Ok(())
    }
}

/// Open the store and make it consistent with this build.  Any error here
/// means the store must not be consulted for this launch.
fn prepare_store(
    config: &UpdatesConfig,
    embedded: &EmbeddedUpdate,
) -> Result<(UpdatesDatabase, PathBuf, BuildDataCheck)> {
    config.validate()?;
    let dir = config
        .updates_dir
        .clone()
        .ok_or_else(|| AirliftError::Config("updates_dir is not set".into()))?;
    let assets_dir = dir.join(ASSETS_DIR);
    std::fs::create_dir_all(&assets_dir)?;

    let mut db = UpdatesDatabase::open(dir.join(DATABASE_FILE))?;
    let check = ensure_consistency(&mut db, &build_data(config)?)?;

    if let Err(e) = embedded.install(&mut db, &assets_dir) {
        warn!(error = %e, "embedded update not installed into the store");
    }
    Ok((db, dir, check))
}

fn build_data(config: &UpdatesConfig) -> Result<BuildData> {
    Ok(BuildData {
        app_id: config.app_id.clone(),
        bundle_version: config.bundle_version.clone(),
        config_hash: hash_bytes(config.build_relevant_json()?.as_bytes()),
    })
}

/// Select and launch, excluding failed candidates until one launches or
/// nothing is left.
fn select_and_launch(
    policy: &SelectionPolicy,
    scope_key: &str,
    db: &mut UpdatesDatabase,
    assets_dir: &Path,
    embedded: &EmbeddedUpdate,
    audit: &Audit,
) -> (ActiveLauncher, Option<AirliftError>) {
    let emergency = |error: AirliftError| {
        audit.record("emergency_launch", None, false, Some(&error.to_string()));
        ActiveLauncher::Emergency(EmergencyLauncher::launch_with_fatal_error(embedded, error))
    };

    let mut candidates = match db.launchable_updates(scope_key) {
        Ok(candidates) => candidates,
        Err(e) => return (emergency(e), None),
    };
    let mut first_error: Option<AirliftError> = None;
    let mut retried = false;

    loop {
        let Some(update) = policy.select_update_to_launch(&candidates) else {
            let error = first_error
                .unwrap_or_else(|| AirliftError::Launch("no launchable update".into()));
            return (emergency(error), None);
        };

        let mut launcher = DatabaseLauncher::new(assets_dir)
            .with_asset_source(Box::new(EmbeddedAssetSource::new(embedded.dir())));
        let outcome = launcher.launch_update(db, &update).map(|_| ());

        let e = match outcome {
            Ok(()) => {
                audit.record("launch", Some(&update.id), true, None);
                info!(update_id = %update.id, embedded = update.is_embedded(), "launch complete");
                return (ActiveLauncher::Database(launcher), first_error);
            }
            Err(e) => e,
        };

        audit.record("launch", Some(&update.id), false, Some(&e.to_string()));
        let recovery = classify_error(&e);
        warn!(update_id = %update.id, error = %e, ?recovery, "launch attempt failed");

        match recovery {
            Recovery::Retry if !retried => retried = true,
            Recovery::ExcludeUpdate | Recovery::Retry => {
                candidates.retain(|c| c.id != update.id);
            }
            Recovery::FallBackToEmbedded => {
                candidates.retain(|c| policy.is_current_embedded(c) && c.id != update.id);
            }
            Recovery::EmergencyLaunch => {
                return (emergency(first_error.unwrap_or(e)), None);
            }
        }
        first_error.get_or_insert(e);
    }
}
