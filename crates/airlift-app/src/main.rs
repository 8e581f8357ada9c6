// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Airlift — over-the-air update client
//
// Entry point. Initialises logging, loads the config, starts the update
// controller, reports which bundle the host runtime should load, and reaps
// unused updates before exiting.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use airlift_launch::{EmbeddedUpdate, UpdatesController};

use services::config_file::{load_config, with_default_updates_dir};
use services::data_dir::updates_dir;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Airlift starting");

    let config = match load_config(std::env::args_os().nth(1).map(PathBuf::from))
        .and_then(|config| with_default_updates_dir(config, updates_dir))
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load config");
            return ExitCode::FAILURE;
        }
    };

    // Without the embedded update there is nothing to fall back to.
    let embedded = match EmbeddedUpdate::load(
        &config.embedded_dir,
        &config.embedded_manifest,
        &config.scope_key,
    ) {
        Ok(embedded) => embedded,
        Err(e) => {
            tracing::error!(error = %e, dir = %config.embedded_dir.display(), "cannot load embedded update");
            return ExitCode::FAILURE;
        }
    };

    let mut controller = UpdatesController::start(config, &embedded);

    if let Some(report) = controller.consume_error_report() {
        match serde_json::to_string(&report) {
            Ok(json) => tracing::warn!(report = %json, "launch recovered from an error"),
            Err(e) => tracing::warn!(error = %e, "cannot serialise error report"),
        }
    }

    let Some(launch_path) = controller.launch_asset_path() else {
        tracing::error!("no launch asset");
        return ExitCode::FAILURE;
    };
    println!("{}", launch_path.display());
    if let Some(id) = controller.launched_update().map(|l| l.update.id) {
        tracing::info!(
            update = %id,
            embedded = controller.is_using_embedded_assets(),
            emergency = controller.is_emergency_launch(),
            "launching"
        );
    }

    // The host reports back once its runtime is up; this binary has no
    // runtime of its own, so reaching here counts as success.
    if let Err(e) = controller.mark_successful_launch() {
        tracing::warn!(error = %e, "cannot record successful launch");
    }

    if let Some(reaper) = controller.spawn_reaper() {
        match reaper.await {
            Ok(Ok(report)) => tracing::debug!(?report, "reaper finished"),
            Ok(Err(e)) => tracing::warn!(error = %e, "reaper failed"),
            Err(e) => tracing::warn!(error = %e, "reaper task panicked"),
        }
    }

    ExitCode::SUCCESS
}
