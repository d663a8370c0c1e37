// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service context: the printer registry plus every component that acts on it.
// Passed explicitly to the scheduler, the hub bridge and any API layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use keepalive_core::clock::Clock;
use keepalive_core::config::{AppConfig, PrinterConfig};
use keepalive_core::decision::{KeepaliveDecision, evaluate};
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::payload::PrinterPayload;
use keepalive_core::render::TemplateRenderer;
use keepalive_core::types::{
    DiscoveryCandidate, DiscoverySnapshot, PrintSource, PrinterState, Template, clamp_cadence,
};

use crate::device::{DeviceQuery, PrintSubmitter};
use crate::executor::{KeepaliveOutcome, PrintExecutor};
use crate::poller::DevicePoller;
use crate::store::StateStore;

/// A partial settings change. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub template: Option<Template>,
    /// Clamped to the supported cadence range.
    pub cadence_hours: Option<i64>,
    pub enabled: Option<bool>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.cadence_hours.is_none() && self.enabled.is_none()
    }
}

pub struct KeepaliveService {
    printers: Vec<PrinterConfig>,
    index: HashMap<String, usize>,
    store: Arc<StateStore>,
    poller: DevicePoller,
    executor: Arc<PrintExecutor>,
    clock: Arc<dyn Clock>,
    discovery: Mutex<DiscoverySnapshot>,
    auto_print_enabled: bool,
}

impl KeepaliveService {
    /// Assemble from prebuilt components. Every registered printer gets a
    /// state record, anchored now if it is new.
    pub fn new(
        printers: Vec<PrinterConfig>,
        store: Arc<StateStore>,
        poller: DevicePoller,
        executor: Arc<PrintExecutor>,
        clock: Arc<dyn Clock>,
        auto_print_enabled: bool,
    ) -> Result<Self> {
        let index = printers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        store.ensure(printers.iter().map(|p| p.id.as_str()), clock.now())?;

        Ok(Self {
            printers,
            index,
            store,
            poller,
            executor,
            clock,
            discovery: Mutex::new(DiscoverySnapshot::default()),
            auto_print_enabled,
        })
    }

    /// Wire the poller and executor from the loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        device: Arc<dyn DeviceQuery>,
        submitter: Arc<dyn PrintSubmitter>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let poller = DevicePoller::new(
            device,
            Arc::clone(&store),
            Arc::clone(&clock),
            chrono::Duration::minutes(i64::from(config.status_poll_interval_minutes)),
            Duration::from_secs(config.ipp_query_timeout_seconds),
        );
        let executor = Arc::new(PrintExecutor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            renderer,
            submitter,
            Self::spool_dir_for(config),
            Duration::from_secs(config.request_timeout_seconds),
            config.failure_retry_minutes,
        ));

        info!(printers = config.printers.len(), "keepalive service ready");
        Self::new(
            config.printers.clone(),
            store,
            poller,
            executor,
            clock,
            config.auto_print_enabled,
        )
    }

    pub fn printers(&self) -> &[PrinterConfig] {
        &self.printers
    }

    pub fn printer(&self, id: &str) -> Result<&PrinterConfig> {
        self.index
            .get(id)
            .and_then(|&i| self.printers.get(i))
            .ok_or_else(|| KeepaliveError::UnknownPrinter(id.to_owned()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn auto_print_enabled(&self) -> bool {
        self.auto_print_enabled
    }

    pub fn state(&self, id: &str) -> Result<PrinterState> {
        self.printer(id)?;
        self.store.read(id, self.clock.now(), PrinterState::clone)
    }

    pub fn decision(&self, id: &str) -> Result<KeepaliveDecision> {
        let printer = self.printer(id)?;
        let now = self.clock.now();
        self.store.read(id, now, |state| evaluate(printer, state, now))
    }

    pub fn payload(&self, id: &str) -> Result<PrinterPayload> {
        let printer = self.printer(id)?;
        let now = self.clock.now();
        self.store
            .read(id, now, |state| PrinterPayload::build(printer, state, now))
    }

    pub fn all_payloads(&self) -> Result<Vec<PrinterPayload>> {
        self.printers.iter().map(|p| self.payload(&p.id)).collect()
    }

    pub async fn poll(&self, id: &str, force: bool) -> Result<PrinterState> {
        let printer = self.printer(id)?;
        self.poller.poll(printer, force).await
    }

    pub async fn run_keepalive(
        &self,
        id: &str,
        template_override: Option<Template>,
        source: PrintSource,
        only_if_needed: bool,
    ) -> Result<KeepaliveOutcome> {
        let printer = self.printer(id)?;
        self.executor
            .run_keepalive(printer, template_override, source, only_if_needed)
            .await
    }

    /// Apply override changes and return the refreshed payload.
    #[instrument(skip(self), fields(printer = %id))]
    pub fn update_settings(&self, id: &str, update: SettingsUpdate) -> Result<PrinterPayload> {
        let printer = self.printer(id)?;
        let now = self.clock.now();
        self.store.update(id, now, |state| {
            if let Some(template) = update.template {
                state.template_override = Some(template);
            }
            if let Some(hours) = update.cadence_hours {
                state.cadence_hours_override = Some(clamp_cadence(hours));
            }
            if let Some(enabled) = update.enabled {
                state.enabled_override = Some(enabled);
            }
            info!(
                template = ?state.template_override,
                cadence_hours = ?state.cadence_hours_override,
                enabled = ?state.enabled_override,
                "settings updated"
            );
            PrinterPayload::build(printer, state, now)
        })
    }

    pub fn clear_overrides(&self, id: &str) -> Result<PrinterPayload> {
        let printer = self.printer(id)?;
        let now = self.clock.now();
        self.store.update(id, now, |state| {
            state.clear_overrides();
            PrinterPayload::build(printer, state, now)
        })
    }

    // -- Discovery --

    pub fn record_discovery(
        &self,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: Result<Vec<DiscoveryCandidate>>,
    ) {
        let mut snapshot = self.discovery.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.last_scan_at = Some(started_at);
        snapshot.last_scan_duration_seconds = (duration.as_secs_f64() * 1000.0).round() / 1000.0;
        match result {
            Ok(candidates) => {
                snapshot.last_error = None;
                snapshot.candidates = candidates;
            }
            Err(e) => {
                warn!(error = %e, "discovery scan failed");
                // Previous candidates stay visible.
                snapshot.last_error = Some(format!("Discovery scan failed: {e}"));
            }
        }
    }

    pub fn discovery_snapshot(&self) -> DiscoverySnapshot {
        self.discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Where rendered pages are staged before submission.
    pub fn spool_dir_for(config: &AppConfig) -> PathBuf {
        config
            .spool_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("printer-keepalive"))
    }
}
