// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Airlift Store — durable record of every known update and asset, the
// ordered schema migration registry, and the build-data guard that keeps the
// store tied to the native build it was written by.

pub mod build_data;
pub mod database;
pub mod migrations;

pub use build_data::{BuildDataCheck, ensure_consistency};
pub use database::UpdatesDatabase;
pub use migrations::{Migration, SqlMigration, default_migrations, run_migrations};
