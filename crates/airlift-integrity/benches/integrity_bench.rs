// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for asset hashing, patch application, and audit
// logging in the airlift-integrity crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use airlift_integrity::{AuditLog, apply_patch, create_patch, hash_bytes};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Benchmark SHA-256 hashing at typical asset sizes: icons, fonts, and
/// multi-megabyte JS bundles.
fn bench_integrity_hash(c: &mut Criterion) {
    let sizes: &[(&str, usize)] = &[
        ("1 KiB", 1024),
        ("100 KiB", 100 * 1024),
        ("1 MiB", 1024 * 1024),
        ("4 MiB", 4 * 1024 * 1024),
    ];

    let mut group = c.benchmark_group("integrity_hash_sha256");
    for &(label, size) in sizes {
        let data = vec![0xABu8; size];
        group.bench_function(label, |b| {
            b.iter(|| {
                let hex = hash_bytes(black_box(&data));
                black_box(hex);
            });
        });
    }
    group.finish();
}

/// Benchmark applying a patch to a 1 MiB bundle where roughly 1% of the
/// bytes changed and 64 KiB were appended.
fn bench_patch_apply(c: &mut Criterion) {
    let old: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let mut new = old.clone();
    for i in (0..new.len()).step_by(100) {
        new[i] = new[i].wrapping_add(1);
    }
    new.extend(std::iter::repeat_n(0x5Au8, 64 * 1024));
    let patch = create_patch(&old, &new);

    c.bench_function("patch_apply (1 MiB bundle)", |b| {
        b.iter(|| {
            let out = apply_patch(black_box(&old), black_box(&patch)).expect("apply failed");
            assert_eq!(out.len(), new.len());
            black_box(out);
        });
    });
}

/// Benchmark recording an audit entry to an in-memory SQLite database.
fn bench_audit_record(c: &mut Criterion) {
    c.bench_function("audit_record (in-memory SQLite)", |b| {
        let log = AuditLog::open_in_memory().expect("open in-memory audit log");

        b.iter(|| {
            log.record(
                black_box("launch"),
                black_box(None),
                black_box(true),
                black_box(Some("benchmark test entry")),
            )
            .expect("record failed");
        });
    });
}

criterion_group!(
    benches,
    bench_integrity_hash,
    bench_patch_apply,
    bench_audit_record,
);
criterion_main!(benches);
