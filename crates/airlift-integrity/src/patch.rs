// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Binary asset patches.
//
// The format follows the bsdiff block layout without the bzip2 stage (the
// transport is expected to compress):
//
//   offset  size  field
//   0       8     magic "AIRDIFF1"
//   8       8     control block length (u64 LE)
//   16      8     diff block length (u64 LE)
//   24      8     new file length (u64 LE)
//   32      ..    control block: (add, copy, seek) triples of 8-byte
//                 sign-magnitude integers
//   ..      ..    diff block: bytes added (wrapping) to the old file
//   ..      ..    extra block: bytes copied verbatim
//
// Each control triple adds `add` diff bytes onto the old file at the current
// old offset, appends `copy` extra bytes, then moves the old offset by `seek`.

use airlift_core::error::{AirliftError, Result};
use tracing::{debug, instrument};

use crate::integrity::verify_hash;

const MAGIC: &[u8; 8] = b"AIRDIFF1";
const HEADER_LEN: usize = 32;

/// Reconstruct the new file from `old` and a patch.
#[instrument(skip_all, fields(old_len = old.len(), patch_len = patch.len()))]
pub fn apply_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &patch[..8] != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let ctrl_len = read_len(&patch[8..16])?;
    let diff_len = read_len(&patch[16..24])?;
    let new_len = read_len(&patch[24..32])?;

    let ctrl_end = HEADER_LEN
        .checked_add(ctrl_len)
        .ok_or_else(|| corrupt("control length overflow"))?;
    let diff_end = ctrl_end
        .checked_add(diff_len)
        .ok_or_else(|| corrupt("diff length overflow"))?;
    if diff_end > patch.len() || ctrl_len % 24 != 0 {
        return Err(corrupt("block lengths exceed patch size"));
    }

    let mut ctrl = &patch[HEADER_LEN..ctrl_end];
    let mut diff = &patch[ctrl_end..diff_end];
    let mut extra = &patch[diff_end..];

    // Every output byte comes from either the diff or the extra block.
    if new_len > diff.len() + extra.len() {
        return Err(corrupt("declared size larger than patch payload"));
    }

    let mut new = vec![0u8; new_len];
    let mut new_pos: usize = 0;
    let mut old_pos: i64 = 0;
    // Reads from `old` can only land within this distance of the start.
    let seek_limit = (old.len() as u64).saturating_add(new_len as u64);

    while new_pos < new_len {
        if ctrl.len() < 24 {
            return Err(corrupt("control block exhausted"));
        }
        let add = offtin(&ctrl[0..8]);
        let copy = offtin(&ctrl[8..16]);
        let seek = offtin(&ctrl[16..24]);
        ctrl = &ctrl[24..];

        let add = usize::try_from(add).map_err(|_| corrupt("negative add length"))?;
        let copy = usize::try_from(copy).map_err(|_| corrupt("negative copy length"))?;

        if add > diff.len() || add > new_len - new_pos {
            return Err(corrupt("add run out of bounds"));
        }
        for i in 0..add {
            let mut byte = diff[i];
            let src = old_pos
                .checked_add(i as i64)
                .ok_or_else(|| corrupt("old position overflow"))?;
            if src >= 0 && (src as usize) < old.len() {
                byte = byte.wrapping_add(old[src as usize]);
            }
            new[new_pos + i] = byte;
        }
        diff = &diff[add..];
        new_pos += add;
        old_pos = old_pos
            .checked_add(add as i64)
            .ok_or_else(|| corrupt("old position overflow"))?;

        if copy > extra.len() || copy > new_len - new_pos {
            return Err(corrupt("copy run out of bounds"));
        }
        new[new_pos..new_pos + copy].copy_from_slice(&extra[..copy]);
        extra = &extra[copy..];
        new_pos += copy;
        old_pos = old_pos
            .checked_add(seek)
            .filter(|pos| pos.unsigned_abs() <= seek_limit)
            .ok_or_else(|| corrupt("seek out of range"))?;
    }

    debug!(new_len, "patch applied");
    Ok(new)
}

/// Apply a patch and accept the output only if it hashes to `expected_hex`.
pub fn apply_patch_verified(old: &[u8], patch: &[u8], expected_hex: &str) -> Result<Vec<u8>> {
    let new = apply_patch(old, patch)?;
    verify_hash(&new, expected_hex)
        .map_err(|e| AirliftError::Patch(format!("patched output rejected: {e}")))?;
    Ok(new)
}

/// Produce a byte-aligned patch turning `old` into `new`.
///
/// The overlapping prefix is encoded as a diff run (zero bytes wherever the
/// files agree) and the remainder of `new` as extra bytes.  There is no
/// suffix matching; servers with a real bsdiff generator can emit smaller
/// patches in the same format.
pub fn create_patch(old: &[u8], new: &[u8]) -> Vec<u8> {
    let add = old.len().min(new.len());
    let copy = new.len() - add;

    let mut ctrl = Vec::new();
    if !new.is_empty() {
        ctrl.extend_from_slice(&offtout(add as i64));
        ctrl.extend_from_slice(&offtout(copy as i64));
        ctrl.extend_from_slice(&offtout(0));
    }

    let diff: Vec<u8> = new[..add]
        .iter()
        .zip(&old[..add])
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();

    let mut patch = Vec::with_capacity(HEADER_LEN + ctrl.len() + diff.len() + copy);
    patch.extend_from_slice(MAGIC);
    patch.extend_from_slice(&(ctrl.len() as u64).to_le_bytes());
    patch.extend_from_slice(&(diff.len() as u64).to_le_bytes());
    patch.extend_from_slice(&(new.len() as u64).to_le_bytes());
    patch.extend_from_slice(&ctrl);
    patch.extend_from_slice(&diff);
    patch.extend_from_slice(&new[add..]);
    patch
}

/// Decode a bsdiff sign-magnitude integer.
fn offtin(buf: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    let negative = bytes[7] & 0x80 != 0;
    bytes[7] &= 0x7f;
    let magnitude = i64::from_le_bytes(bytes);
    if negative { -magnitude } else { magnitude }
}

/// Encode a bsdiff sign-magnitude integer.
fn offtout(value: i64) -> [u8; 8] {
    let mut bytes = value.unsigned_abs().to_le_bytes();
    if value < 0 {
        bytes[7] |= 0x80;
    }
    bytes
}

fn read_len(buf: &[u8]) -> Result<usize> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(buf);
    usize::try_from(u64::from_le_bytes(bytes)).map_err(|_| corrupt("length exceeds address space"))
}

fn corrupt(detail: &str) -> AirliftError {
    AirliftError::Patch(format!("corrupt patch: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::hash_bytes;

    #[test]
    fn sign_magnitude_encoding() {
        for v in [0i64, 1, -1, 42, -42, i64::MAX, -(i64::MAX)] {
            assert_eq!(offtin(&offtout(v)), v);
        }
        assert_eq!(offtout(-1)[7], 0x80);
    }

    #[test]
    fn created_patch_reproduces_new_file() {
        let old = b"console.log('v1'); // shared tail".to_vec();
        let new = b"console.log('v2'); // shared tail, plus more".to_vec();
        let patch = create_patch(&old, &new);
        assert_eq!(apply_patch(&old, &patch).expect("apply"), new);
    }

    #[test]
    fn shrinking_file() {
        let old = vec![9u8; 100];
        let new = vec![9u8; 10];
        let patch = create_patch(&old, &new);
        assert_eq!(apply_patch(&old, &patch).expect("apply"), new);
    }

    #[test]
    fn empty_new_file() {
        let patch = create_patch(b"anything", b"");
        assert_eq!(apply_patch(b"anything", &patch).expect("apply"), Vec::<u8>::new());
    }

    #[test]
    fn hand_written_patch_with_seek() {
        // new = old[4..8] ++ "XY", expressed as: seek 4, add 4, copy 2.
        let old = b"abcdefgh";
        let mut ctrl = Vec::new();
        ctrl.extend_from_slice(&offtout(0));
        ctrl.extend_from_slice(&offtout(0));
        ctrl.extend_from_slice(&offtout(4));
        ctrl.extend_from_slice(&offtout(4));
        ctrl.extend_from_slice(&offtout(2));
        ctrl.extend_from_slice(&offtout(0));

        let mut patch = Vec::new();
        patch.extend_from_slice(MAGIC);
        patch.extend_from_slice(&(ctrl.len() as u64).to_le_bytes());
        patch.extend_from_slice(&4u64.to_le_bytes());
        patch.extend_from_slice(&6u64.to_le_bytes());
        patch.extend_from_slice(&ctrl);
        patch.extend_from_slice(&[0, 0, 0, 0]);
        patch.extend_from_slice(b"XY");

        assert_eq!(apply_patch(old, &patch).expect("apply"), b"efghXY");
    }

    #[test]
    fn runaway_seek_is_corrupt_not_a_panic() {
        let mut ctrl = Vec::new();
        for v in [0, 0, i64::MAX, 1, 0, 0] {
            ctrl.extend_from_slice(&offtout(v));
        }
        let mut patch = Vec::new();
        patch.extend_from_slice(MAGIC);
        patch.extend_from_slice(&(ctrl.len() as u64).to_le_bytes());
        patch.extend_from_slice(&1u64.to_le_bytes());
        patch.extend_from_slice(&1u64.to_le_bytes());
        patch.extend_from_slice(&ctrl);
        patch.push(7);

        let err = apply_patch(b"abc", &patch).unwrap_err();
        assert!(matches!(err, AirliftError::Patch(_)));

        // A seek far behind the start of the old file is rejected as well.
        let mut ctrl = Vec::new();
        for v in [0, 0, -(i64::MAX), 1, 0, 0] {
            ctrl.extend_from_slice(&offtout(v));
        }
        patch.truncate(HEADER_LEN);
        patch.extend_from_slice(&ctrl);
        patch.push(7);
        assert!(matches!(apply_patch(b"abc", &patch), Err(AirliftError::Patch(_))));
    }

    #[test]
    fn verified_apply_rejects_wrong_hash() {
        let old = b"old bytes";
        let new = b"new bytes";
        let patch = create_patch(old, new);

        assert!(apply_patch_verified(old, &patch, &hash_bytes(new)).is_ok());
        let err = apply_patch_verified(old, &patch, &hash_bytes(b"other")).unwrap_err();
        assert!(matches!(err, AirliftError::Patch(_)));
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(apply_patch(b"", b"short"), Err(AirliftError::Patch(_))));

        let mut patch = create_patch(b"abc", b"abd");
        patch[0] = b'X';
        assert!(apply_patch(b"abc", &patch).is_err());

        let patch = create_patch(b"abc", b"abcdef");
        assert!(apply_patch(b"abc", &patch[..patch.len() - 1]).is_err());
    }
}
