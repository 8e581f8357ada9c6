// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Airlift.

use thiserror::Error;

/// Top-level error type for all Airlift operations.
#[derive(Debug, Error)]
pub enum AirliftError {
    // -- Integrity --
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("binary patch failed: {0}")]
    Patch(String),

    // -- Storage / persistence --
    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Launch --
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AirliftError {
    /// Whether this error came from hash or manifest verification (including
    /// patch output verification).
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Integrity(_) | Self::IntegrityMismatch { .. } | Self::Patch(_)
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AirliftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_family() {
        assert!(AirliftError::Integrity("x".into()).is_integrity());
        assert!(
            AirliftError::IntegrityMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_integrity()
        );
        assert!(AirliftError::Patch("short".into()).is_integrity());
        assert!(!AirliftError::Launch("none".into()).is_integrity());
    }

    #[test]
    fn migration_message_names_the_migration() {
        let err = AirliftError::Migration {
            name: "0002_add_expected_hash".into(),
            reason: "duplicate column".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration 0002_add_expected_hash failed: duplicate column"
        );
    }
}
