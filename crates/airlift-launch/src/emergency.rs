// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Degraded launcher that serves the embedded bundle straight from the app
// binary's directory.  Used when the store cannot be opened or nothing it
// holds can be launched.  It never fails and never touches the store.

use std::path::Path;

use airlift_core::error::AirliftError;
use airlift_core::types::LaunchedUpdate;
use serde_json::Value;
use tracing::{error, info};

use crate::embedded::EmbeddedUpdate;
use crate::launcher::{AppLauncher, LaunchState};

pub struct EmergencyLauncher {
    launched: LaunchedUpdate,
    error: Option<AirliftError>,
}

impl EmergencyLauncher {
    /// Launch the embedded update and keep `error` for diagnostics.
    pub fn launch_with_fatal_error(embedded: &EmbeddedUpdate, error: AirliftError) -> Self {
        error!(error = %error, "emergency launch of embedded update");
        Self {
            launched: embedded.launched_update(),
            error: Some(error),
        }
    }

    /// Launch the embedded update because updates are turned off.
    pub fn launch_embedded(embedded: &EmbeddedUpdate) -> Self {
        info!(update_id = %embedded.update().id, "updates disabled, launching embedded update");
        Self {
            launched: embedded.launched_update(),
            error: None,
        }
    }

    /// Drain the originating error.  Returns it once, then `None`.
    pub fn consume_error(&mut self) -> Option<AirliftError> {
        self.error.take()
    }
}

impl AppLauncher for EmergencyLauncher {
    fn state(&self) -> LaunchState {
        LaunchState::Launched
    }

    fn launch_asset_path(&self) -> Option<&Path> {
        Some(&self.launched.launch_asset_path)
    }

    fn manifest(&self) -> Option<&Value> {
        Some(&self.launched.update.manifest)
    }

    fn launched_update(&self) -> Option<&LaunchedUpdate> {
        Some(&self.launched)
    }

    fn is_using_embedded_assets(&self) -> bool {
        true
    }
}
