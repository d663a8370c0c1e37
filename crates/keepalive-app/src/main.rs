// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer Keepalive daemon
//
// Entry point. Initialises logging, loads options, wires backend services and
// runs until SIGINT/SIGTERM.

mod services;

use std::process::ExitCode;

use keepalive_core::config::AppConfig;

use services::daemon::Daemon;
use services::data_dir;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Printer Keepalive starting");

    let options = data_dir::options_path();
    let config = match AppConfig::load(&options) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %options.display(), error = %e, "cannot load options");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::init(&config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    daemon.run().await;
    ExitCode::SUCCESS
}
