// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Diagnostic reports for the telemetry collaborator.
//
// Errors are never shown to the end user.  Once drained from a launcher they
// are turned into flat, serialisable reports with a stable code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AirliftError;
use crate::types::UpdateId;

/// Stable error code for telemetry grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AssetIntegrity,
    ManifestInvalid,
    PatchFailed,
    MigrationFailed,
    StoreFailed,
    NoLaunchableUpdate,
    InvalidConfig,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetIntegrity => "asset_integrity",
            Self::ManifestInvalid => "manifest_invalid",
            Self::PatchFailed => "patch_failed",
            Self::MigrationFailed => "migration_failed",
            Self::StoreFailed => "store_failed",
            Self::NoLaunchableUpdate => "no_launchable_update",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

/// Map an error onto its telemetry code.
pub fn error_code(err: &AirliftError) -> ErrorCode {
    match err {
        AirliftError::Integrity(detail) if detail.starts_with("invalid manifest") => {
            ErrorCode::ManifestInvalid
        }
        AirliftError::Integrity(_) | AirliftError::IntegrityMismatch { .. } => {
            ErrorCode::AssetIntegrity
        }
        AirliftError::Patch(_) => ErrorCode::PatchFailed,
        AirliftError::Migration { .. } => ErrorCode::MigrationFailed,
        AirliftError::Database(_) | AirliftError::Io(_) | AirliftError::Serialization(_) => {
            ErrorCode::StoreFailed
        }
        AirliftError::Launch(_) => ErrorCode::NoLaunchableUpdate,
        AirliftError::Config(_) => ErrorCode::InvalidConfig,
    }
}

/// A single error, ready for upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    /// Update being launched or patched when the error happened, if any.
    pub update_id: Option<UpdateId>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn from_error(err: &AirliftError, update_id: Option<UpdateId>) -> Self {
        Self {
            code: error_code(err),
            message: err.to_string(),
            update_id,
            recorded_at: Utc::now(),
        }
    }
}
