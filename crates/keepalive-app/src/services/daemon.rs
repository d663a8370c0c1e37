// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon wiring: builds every backend subsystem from the loaded options and
// runs the scheduler and MQTT bridge until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use keepalive_core::clock::SystemClock;
use keepalive_core::config::AppConfig;
use keepalive_core::error::Result;
use keepalive_document::{NoEntities, PageRenderer};
use keepalive_mqtt::MqttBridge;
use keepalive_print::{IppDevice, KeepaliveService, MdnsDiscovery, Scheduler, StateStore};

use super::data_dir;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything the daemon runs, built but not yet started.
pub struct Daemon {
    service: Arc<KeepaliveService>,
    scheduler: Scheduler,
    bridge: Option<MqttBridge>,
}

impl Daemon {
    /// Open the state file and wire the service, scheduler and bridge.
    pub fn init(config: &AppConfig) -> Result<Self> {
        let dir = data_dir::data_dir();
        let state_path = data_dir::state_path(config.state_path.as_deref(), &dir);
        info!(path = %state_path.display(), "opening state file");
        let store = Arc::new(StateStore::open(&state_path)?);

        let device = Arc::new(IppDevice);
        let renderer = Arc::new(PageRenderer::new(Arc::new(NoEntities)));
        let service = Arc::new(KeepaliveService::from_config(
            config,
            store,
            Arc::new(SystemClock),
            device.clone(),
            device.clone(),
            renderer,
        )?);

        let mut scheduler = Scheduler::new(
            Arc::clone(&service),
            Duration::from_secs(config.scheduler_tick_seconds),
        );
        if config.discovery.enabled {
            let discovery = Arc::new(MdnsDiscovery::new(config.discovery.clone(), device));
            scheduler = scheduler.with_discovery(
                discovery,
                chrono::Duration::minutes(i64::from(config.discovery.interval_minutes)),
            );
        } else {
            info!("network discovery disabled");
        }

        let bridge = match &config.mqtt {
            Some(mqtt) => {
                let bridge = MqttBridge::new(mqtt, Arc::clone(&service));
                scheduler = scheduler.with_publisher(Arc::new(bridge.handle()));
                Some(bridge)
            }
            None => {
                info!("MQTT not configured; state is kept locally only");
                None
            }
        };

        Ok(Self {
            service,
            scheduler,
            bridge,
        })
    }

    /// Run until SIGINT/SIGTERM, then stop the bridge (which publishes
    /// `offline`) and the scheduler.
    pub async fn run(self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        if let Some(bridge) = self.bridge {
            tasks.push(("mqtt", tokio::spawn(bridge.run(shutdown_rx.clone()))));
        }
        tasks.push(("scheduler", tokio::spawn(self.scheduler.run(shutdown_rx))));

        info!(printers = self.service.printers().len(), "daemon running");
        wait_for_signal().await;
        info!("shutdown requested");

        // Receivers outlive the send; a failure only means every task already ended.
        let _ = shutdown_tx.send(true);
        for (name, task) in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => warn!(task = name, "task did not stop in time"),
            }
        }
        info!("daemon stopped");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler; waiting for Ctrl-C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
    }
}
