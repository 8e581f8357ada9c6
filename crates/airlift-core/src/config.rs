// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Updates configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AirliftError, Result};

/// Static update settings baked into the native build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    /// When false the embedded update is launched and the store is never opened.
    pub enabled: bool,
    /// Logical app/project identifier updates are scoped to.
    pub scope_key: String,
    /// Where the fetch collaborator checks for new manifests.
    pub update_url: Option<String>,
    /// Compatibility tag of this native build.
    pub runtime_version: String,
    /// Native application identifier (bundle id / package name).
    pub app_id: String,
    /// Native build version string.
    pub bundle_version: String,
    /// Extra headers sent with manifest requests.
    pub request_headers: BTreeMap<String, String>,
    /// Directory holding the store database and downloaded assets.
    pub updates_dir: Option<PathBuf>,
    /// Directory holding the embedded update shipped with the binary.
    pub embedded_dir: PathBuf,
    /// Embedded manifest filename inside `embedded_dir`.
    pub embedded_manifest: String,
    /// Record update lifecycle events in the audit log.
    pub audit_enabled: bool,
    /// Audit entries older than this are purged at startup.
    pub event_retention_hours: u32,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope_key: String::new(),
            update_url: None,
            runtime_version: "1.0.0".into(),
            app_id: String::new(),
            bundle_version: "1".into(),
            request_headers: BTreeMap::new(),
            updates_dir: None,
            embedded_dir: PathBuf::from("embedded"),
            embedded_manifest: "app.manifest".into(),
            audit_enabled: true,
            event_retention_hours: 24,
        }
    }
}

impl UpdatesConfig {
    /// Check the settings an enabled client cannot run without.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.scope_key.trim().is_empty() {
            return Err(AirliftError::Config("scope_key must not be empty".into()));
        }
        if self.runtime_version.trim().is_empty() {
            return Err(AirliftError::Config(
                "runtime_version must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The part of the configuration that, when changed, invalidates
    /// previously downloaded updates.
    pub fn build_relevant_json(&self) -> Result<String> {
        let relevant = serde_json::json!({
            "scopeKey": self.scope_key,
            "updateUrl": self.update_url,
            "requestHeaders": self.request_headers,
        });
        Ok(serde_json::to_string(&relevant)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_a_scope_key() {
        let config = UpdatesConfig::default();
        assert!(matches!(config.validate(), Err(AirliftError::Config(_))));

        let disabled = UpdatesConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: UpdatesConfig =
            serde_json::from_str(r#"{"scope_key":"@acme/app","runtime_version":"2.0"}"#)
                .expect("parse");
        assert_eq!(config.scope_key, "@acme/app");
        assert_eq!(config.runtime_version, "2.0");
        assert!(config.enabled);
        assert_eq!(config.embedded_manifest, "app.manifest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn build_relevant_json_tracks_url_and_headers() {
        let a = UpdatesConfig {
            scope_key: "s".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.request_headers.insert("channel".into(), "beta".into());
        assert_ne!(
            a.build_relevant_json().unwrap(),
            b.build_relevant_json().unwrap()
        );

        // Runtime version is not part of the build-relevant data.
        let mut c = a.clone();
        c.runtime_version = "9".into();
        assert_eq!(
            a.build_relevant_json().unwrap(),
            c.build_relevant_json().unwrap()
        );
    }
}
