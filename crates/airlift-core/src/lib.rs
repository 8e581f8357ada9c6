// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Airlift — Core types and error definitions shared across all crates.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::UpdatesConfig;
pub use error::AirliftError;
pub use types::*;
