// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Airlift update client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateId(pub Uuid);

impl UpdateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UpdateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle states of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// Written after download; assets not yet verified on disk.
    Pending,
    /// Every asset is present on disk.
    Ready,
    /// Has been launched successfully at least once in this install.
    Launchable,
    /// Shipped inside the native binary; always a candidate.
    Embedded,
}

impl UpdateStatus {
    /// Keyword stored in the `updates.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Launchable => "launchable",
            Self::Embedded => "embedded",
        }
    }

    /// Parse the keyword stored in the `updates.status` column.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "launchable" => Some(Self::Launchable),
            "embedded" => Some(Self::Embedded),
            _ => None,
        }
    }

    /// Whether an update in this state may be handed to a launcher.
    pub fn is_launchable(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One fetched (or embedded), installable version of the bundle and assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub id: UpdateId,
    /// Logical app/project the update belongs to.
    pub scope_key: String,
    /// Server-asserted creation time; newest wins.
    pub commit_time: DateTime<Utc>,
    pub runtime_version: String,
    /// Manifest as received, kept verbatim.
    pub manifest: serde_json::Value,
    pub status: UpdateStatus,
    /// Bumped every time the update is chosen for launch.
    pub last_accessed: DateTime<Utc>,
    pub successful_launch_count: u32,
    pub failed_launch_count: u32,
}

impl Update {
    pub fn new(
        id: UpdateId,
        scope_key: impl Into<String>,
        commit_time: DateTime<Utc>,
        runtime_version: impl Into<String>,
        manifest: serde_json::Value,
    ) -> Self {
        Self {
            id,
            scope_key: scope_key.into(),
            commit_time,
            runtime_version: runtime_version.into(),
            manifest,
            status: UpdateStatus::Pending,
            last_accessed: Utc::now(),
            successful_launch_count: 0,
            failed_launch_count: 0,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.status == UpdateStatus::Embedded
    }
}

/// A content-addressed file belonging to one or more updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Logical name, unique across the store.
    pub key: String,
    /// MIME type or file extension from the manifest.
    pub content_type: String,
    /// Hash the manifest promised for the file bytes.
    pub expected_hash: Option<String>,
    /// Hash of the bytes actually written to disk.
    pub content_hash: Option<String>,
    /// Filename relative to the updates directory; `None` until materialised.
    pub local_path: Option<String>,
    /// Whether this is the JS bundle the host runtime loads.
    pub is_launch_asset: bool,
    pub download_time: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            expected_hash: None,
            content_hash: None,
            local_path: None,
            is_launch_asset: false,
            download_time: None,
        }
    }

    /// Hash to verify the on-disk bytes against: the manifest's promise if
    /// there is one, otherwise whatever was recorded at download time.
    pub fn verification_hash(&self) -> Option<&str> {
        self.expected_hash
            .as_deref()
            .or(self.content_hash.as_deref())
    }
}

/// Identity of the native build the store belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildData {
    pub app_id: String,
    pub bundle_version: String,
    /// Hash of the update-relevant static configuration.
    pub config_hash: String,
}

impl BuildData {
    /// Single-string fingerprint persisted in the store.
    pub fn fingerprint(&self) -> String {
        format!("{}@{}+{}", self.app_id, self.bundle_version, self.config_hash)
    }
}

/// Server-supplied manifest filters, keyed by manifest metadata field.
pub type ManifestFilters = serde_json::Map<String, serde_json::Value>;

/// The update serving the running app, set once per process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedUpdate {
    pub update: Update,
    /// Absolute path of the bundle the host runtime should load.
    pub launch_asset_path: PathBuf,
    /// Every asset key mapped to its absolute file path.
    pub asset_files: HashMap<String, PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_keywords_parse_back() {
        for status in [
            UpdateStatus::Pending,
            UpdateStatus::Ready,
            UpdateStatus::Launchable,
            UpdateStatus::Embedded,
        ] {
            assert_eq!(UpdateStatus::from_db_str(status.as_str()), Some(status));
        }
        assert_eq!(UpdateStatus::from_db_str("bogus"), None);
    }

    #[test]
    fn pending_is_not_launchable() {
        assert!(!UpdateStatus::Pending.is_launchable());
        assert!(UpdateStatus::Ready.is_launchable());
        assert!(UpdateStatus::Embedded.is_launchable());
    }

    #[test]
    fn verification_hash_prefers_expected() {
        let mut asset = Asset::new("bundle", "application/javascript");
        assert_eq!(asset.verification_hash(), None);
        asset.content_hash = Some("downloaded".into());
        assert_eq!(asset.verification_hash(), Some("downloaded"));
        asset.expected_hash = Some("promised".into());
        assert_eq!(asset.verification_hash(), Some("promised"));
    }

    #[test]
    fn fingerprint_changes_with_any_component() {
        let a = BuildData {
            app_id: "com.example".into(),
            bundle_version: "1.0".into(),
            config_hash: "abc".into(),
        };
        let mut b = a.clone();
        b.bundle_version = "1.1".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn update_id_parses_its_display() {
        let id = UpdateId::new();
        let parsed: UpdateId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }
}
