// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Default location of the update store on desktop hosts.
//
// Mobile shells always pass `updates_dir` explicitly; this is only consulted
// when the config leaves it unset.

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "airlift";
const UPDATES_SUBDIR: &str = "updates";

/// `$XDG_DATA_HOME/airlift/updates` (or its fallbacks), created if missing.
pub fn updates_dir() -> std::io::Result<PathBuf> {
    let dir = data_home(std::env::var_os("XDG_DATA_HOME"), std::env::var_os("HOME"))
        .join(APP_DIR)
        .join(UPDATES_SUBDIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// XDG base directory resolution.  A relative `XDG_DATA_HOME` is invalid and
/// ignored; without a home directory the system temp dir is used.
fn data_home(xdg_data_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(xdg) = xdg_data_home.map(PathBuf::from).filter(|p| p.is_absolute()) {
        return xdg;
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(".local").join("share"),
        None => std::env::temp_dir(),
    }
}
