// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! airlift-integrity — Byte-level trust for downloaded updates.
//!
//! SHA-256 fingerprints for asset verification, the binary patch format used
//! to deliver asset deltas, and an append-only audit trail of update
//! lifecycle events.

pub mod audit;
pub mod integrity;
pub mod patch;

pub use audit::{AuditEntry, AuditLog};
pub use integrity::{hash_bytes, hash_file, verify_file, verify_hash};
pub use patch::{apply_patch, apply_patch_verified, create_patch};
