// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — resolves where the update client keeps its files and which
// settings it starts with.

pub mod config_file;
pub mod data_dir;
