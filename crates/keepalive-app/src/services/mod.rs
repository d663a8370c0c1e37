// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: resolves paths and wires the backend crates into one
// running daemon.

pub mod daemon;
pub mod data_dir;
