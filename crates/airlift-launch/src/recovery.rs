// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Launch error recovery.
//
// Classifies errors raised while launching into the next step the controller
// takes.  Bad bytes or a bad manifest only disqualify the update they belong
// to; a broken store or configuration skips the store entirely.

use airlift_core::error::AirliftError;

/// What to do after a failed launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Drop this update from the candidates and select again.
    ExcludeUpdate,
    /// Skip every downloaded update and launch the embedded one from the store.
    FallBackToEmbedded,
    /// Serve the embedded bundle without the store.
    EmergencyLaunch,
    /// Transient; try the same update once more on a fresh launcher.
    Retry,
}

/// Map a launch error onto its recovery step.
pub fn classify_error(err: &AirliftError) -> Recovery {
    match err {
        AirliftError::Integrity(_)
        | AirliftError::IntegrityMismatch { .. }
        | AirliftError::Patch(_)
        | AirliftError::Serialization(_) => Recovery::ExcludeUpdate,

        AirliftError::Migration { .. }
        | AirliftError::Database(_)
        | AirliftError::Config(_)
        | AirliftError::Launch(_) => Recovery::EmergencyLaunch,

        AirliftError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock => Recovery::Retry,
            std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData => {
                Recovery::ExcludeUpdate
            }
            _ => Recovery::FallBackToEmbedded,
        },
    }
}
