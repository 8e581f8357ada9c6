// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Config file loading.

use std::path::{Path, PathBuf};

use airlift_core::UpdatesConfig;
use airlift_core::error::{AirliftError, Result};

/// Environment variable naming the config file when none is passed on the
/// command line.
pub const CONFIG_ENV: &str = "AIRLIFT_CONFIG";

/// Load the config named by `explicit`, else by `AIRLIFT_CONFIG`, else the
/// defaults.
///
/// A named file that is missing or malformed is an error; silently launching
/// with defaults would point the client at the wrong store.  Relative
/// `embedded_dir` and `updates_dir` paths are resolved against the config
/// file's directory.
pub fn load_config(explicit: Option<PathBuf>) -> Result<UpdatesConfig> {
    let path = explicit.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let Some(path) = path else {
        return Ok(UpdatesConfig::default());
    };

    let data = std::fs::read_to_string(&path).map_err(|e| {
        AirliftError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut config: UpdatesConfig = serde_json::from_str(&data)?;

    if let Some(base) = path.parent() {
        config.embedded_dir = relative_to(base, &config.embedded_dir);
        config.updates_dir = config.updates_dir.map(|dir| relative_to(base, &dir));
    }
    Ok(config)
}

/// Fill in the updates directory when the config leaves it unset.
pub fn with_default_updates_dir(
    mut config: UpdatesConfig,
    fallback: impl FnOnce() -> std::io::Result<PathBuf>,
) -> Result<UpdatesConfig> {
    if config.updates_dir.is_none() {
        config.updates_dir = Some(fallback()?);
    }
    Ok(config)
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlift.json");
        std::fs::write(
            &path,
            r#"{"scope_key":"@acme/app","embedded_dir":"bundle","updates_dir":"/var/lib/airlift"}"#,
        )
        .unwrap();

        let config = load_config(Some(path)).expect("load");
        assert_eq!(config.scope_key, "@acme/app");
        assert_eq!(config.embedded_dir, dir.path().join("bundle"));
        assert_eq!(config.updates_dir, Some(PathBuf::from("/var/lib/airlift")));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, AirliftError::Config(_)));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlift.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_config(Some(path)),
            Err(AirliftError::Serialization(_))
        ));
    }

    #[test]
    fn updates_dir_fallback_only_when_unset() {
        let config =
            with_default_updates_dir(UpdatesConfig::default(), || Ok("/data".into())).unwrap();
        assert_eq!(config.updates_dir, Some(PathBuf::from("/data")));

        let explicit = UpdatesConfig {
            updates_dir: Some("/mine".into()),
            ..Default::default()
        };
        let config = with_default_updates_dir(explicit, || panic!("fallback consulted")).unwrap();
        assert_eq!(config.updates_dir, Some(PathBuf::from("/mine")));
    }

    #[test]
    fn unusable_fallback_dir_is_an_error() {
        let denied = || -> std::io::Result<PathBuf> {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
        };
        let err = with_default_updates_dir(UpdatesConfig::default(), denied).unwrap_err();
        assert!(matches!(err, AirliftError::Io(_)));
    }
}
