// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printer Keepalive.
//
// Skip decisions (not due, disabled, busy, cooldown) are NOT errors and never
// appear here; they are modelled as outcomes by the print executor.

use thiserror::Error;

/// Top-level error type for all keepalive operations.
#[derive(Debug, Error)]
pub enum KeepaliveError {
    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown printer id: {0}")]
    UnknownPrinter(String),

    // -- Device --
    #[error("device query failed: {0}")]
    DeviceQuery(String),

    #[error("print submission failed: {0}")]
    PrintSubmission(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("page rendering failed: {0}")]
    Render(String),

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Hub bridge --
    #[error("MQTT error: {0}")]
    Mqtt(String),

    // -- Storage / persistence --
    #[error("state persistence failed: {0}")]
    StatePersistence(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KeepaliveError>;
