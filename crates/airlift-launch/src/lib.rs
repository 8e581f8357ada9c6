// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Airlift Launch — decides which stored update runs, launches it with every
// asset verified on disk, falls back to the embedded bundle when that is not
// possible, and reclaims updates that can never be selected again.

pub mod controller;
pub mod embedded;
pub mod emergency;
pub mod launcher;
pub mod patching;
pub mod reaper;
pub mod recovery;
pub mod selection;

pub use controller::UpdatesController;
pub use embedded::EmbeddedUpdate;
pub use emergency::EmergencyLauncher;
pub use launcher::{AppLauncher, AssetSource, DatabaseLauncher, EmbeddedAssetSource, LaunchState};
pub use reaper::{ReapReport, reap_unused_updates};
pub use recovery::{Recovery, classify_error};
pub use selection::{SelectionPolicy, matches_filters};
