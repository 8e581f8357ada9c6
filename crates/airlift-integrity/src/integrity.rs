// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Asset integrity — SHA-256 hashing for tamper and truncation detection.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use airlift_core::error::{AirliftError, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Stream a file through SHA-256 without loading it into memory.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify that `data` matches the expected SHA-256 hex digest.
///
/// Comparison is case-insensitive so manifests may publish either case.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_bytes(data);
    check(expected_hex, actual)
}

/// Verify a file on disk against the expected SHA-256 hex digest.
pub fn verify_file(path: impl AsRef<Path>, expected_hex: &str) -> Result<()> {
    let actual = hash_file(path.as_ref())?;
    debug!(path = %path.as_ref().display(), "file hashed for verification");
    check(expected_hex, actual)
}

fn check(expected_hex: &str, actual: String) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(AirliftError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}
