// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Manifest parsing and schema validation.
//
// A manifest is a JSON object of the form
//
//   {
//     "id": "<uuid>",
//     "createdAt": "<RFC 3339>" | <epoch millis>,
//     "runtimeVersion": "1.0.0",
//     "launchAsset": { "key": "...", "hash": "...", "contentType": "..." },
//     "assets": [ { "key": "...", "hash": "...", "contentType": "..." } ],
//     "metadata": { ... }
//   }
//
// `commitTime` is accepted as an alias of `createdAt`.  The document itself
// is stored verbatim; only the fields above are interpreted.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{AirliftError, Result};
use crate::types::{Asset, Update, UpdateId};

/// Parse a manifest into an update record (status `Pending`) and its assets.
pub fn parse_manifest(manifest: &Value, scope_key: &str) -> Result<(Update, Vec<Asset>)> {
    let obj = manifest
        .as_object()
        .ok_or_else(|| invalid("manifest is not a JSON object"))?;

    let id_str = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing string field `id`"))?;
    let id: UpdateId = id_str
        .parse()
        .map_err(|e| invalid(&format!("`id` is not a UUID: {e}")))?;

    let commit_time = commit_time(obj.get("createdAt").or_else(|| obj.get("commitTime")))?;

    let runtime_version = obj
        .get("runtimeVersion")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("missing string field `runtimeVersion`"))?;

    let launch = obj
        .get("launchAsset")
        .ok_or_else(|| invalid("missing object field `launchAsset`"))?;
    let mut launch_asset = parse_asset(launch)?;
    launch_asset.is_launch_asset = true;

    let mut assets = vec![launch_asset];
    if let Some(list) = obj.get("assets") {
        let list = list
            .as_array()
            .ok_or_else(|| invalid("`assets` is not an array"))?;
        for entry in list {
            let asset = parse_asset(entry)?;
            if assets.iter().any(|a| a.key == asset.key) {
                continue;
            }
            assets.push(asset);
        }
    }

    let update = Update::new(id, scope_key, commit_time, runtime_version, manifest.clone());
    Ok((update, assets))
}

/// Re-check a stored manifest against the schema without building records.
pub fn validate_manifest(manifest: &Value) -> Result<()> {
    parse_manifest(manifest, "").map(|_| ())
}

/// Metadata object used for manifest filter matching.
///
/// Falls back to the manifest's top level when there is no `metadata` object.
pub fn metadata(manifest: &Value) -> Option<&serde_json::Map<String, Value>> {
    manifest
        .get("metadata")
        .and_then(Value::as_object)
        .or_else(|| manifest.as_object())
}

fn parse_asset(value: &Value) -> Result<Asset> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("asset entry is not a JSON object"))?;
    let key = obj
        .get("key")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("asset is missing string field `key`"))?;
    let content_type = obj
        .get("contentType")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");

    let mut asset = Asset::new(key, content_type);
    asset.expected_hash = obj.get("hash").and_then(Value::as_str).map(str::to_owned);
    Ok(asset)
}

fn commit_time(value: Option<&Value>) -> Result<DateTime<Utc>> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(&format!("`createdAt` is not RFC 3339: {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| invalid("`createdAt` is not a valid epoch-millis timestamp")),
        _ => Err(invalid("missing field `createdAt`")),
    }
}

fn invalid(detail: &str) -> AirliftError {
    AirliftError::Integrity(format!("invalid manifest: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "id": "0f1c2c9e-3c67-4b0e-9a63-1c0f6f0b6a11",
            "createdAt": "2024-03-01T12:00:00Z",
            "runtimeVersion": "1.0.0",
            "launchAsset": { "key": "bundle-abc", "hash": "aa", "contentType": "application/javascript" },
            "assets": [
                { "key": "logo", "hash": "bb", "contentType": "image/png" },
                { "key": "logo", "hash": "bb", "contentType": "image/png" }
            ],
            "metadata": { "branch": "main" }
        })
    }

    #[test]
    fn parses_update_and_assets() {
        let (update, assets) = parse_manifest(&sample(), "@acme/app").expect("parse");
        assert_eq!(update.scope_key, "@acme/app");
        assert_eq!(update.runtime_version, "1.0.0");
        assert_eq!(update.status, crate::UpdateStatus::Pending);
        assert_eq!(update.manifest, sample());
        assert_eq!(assets.len(), 2, "duplicate asset keys collapse");
        assert!(assets[0].is_launch_asset);
        assert_eq!(assets[0].expected_hash.as_deref(), Some("aa"));
        assert!(!assets[1].is_launch_asset);
    }

    #[test]
    fn accepts_epoch_millis_commit_time() {
        let mut m = sample();
        m.as_object_mut().unwrap().remove("createdAt");
        m["commitTime"] = json!(1_700_000_000_000i64);
        let (update, _) = parse_manifest(&m, "s").expect("parse");
        assert_eq!(update.commit_time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn rejects_missing_launch_asset() {
        let mut m = sample();
        m.as_object_mut().unwrap().remove("launchAsset");
        let err = validate_manifest(&m).unwrap_err();
        assert!(matches!(err, AirliftError::Integrity(_)));
    }

    #[test]
    fn rejects_non_uuid_id() {
        let mut m = sample();
        m["id"] = json!("not-a-uuid");
        assert!(validate_manifest(&m).is_err());
    }

    #[test]
    fn rejects_non_object() {
        assert!(validate_manifest(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn metadata_falls_back_to_top_level() {
        let m = sample();
        assert_eq!(metadata(&m).unwrap().get("branch"), Some(&json!("main")));

        let flat = json!({ "branch": "beta" });
        assert_eq!(metadata(&flat).unwrap().get("branch"), Some(&json!("beta")));
    }
}
