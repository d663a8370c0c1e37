// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scheduler loop: periodic discovery, then poll / evaluate / print / publish
// for each printer in turn.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use keepalive_core::types::PrintSource;

use crate::device::{DiscoveryProvider, StatePublisher};
use crate::executor::KeepaliveOutcome;
use crate::service::KeepaliveService;

/// What the loop is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    #[default]
    Idle,
    Discovering,
    Servicing(String),
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Discovering => f.write_str("discovering"),
            Self::Servicing(id) => write!(f, "servicing {id}"),
        }
    }
}

/// Summary of one tick, mostly for tests and debug logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub discovery_ran: bool,
    pub polled: Vec<String>,
    pub printed: Vec<String>,
    pub failed: Vec<String>,
    pub published: Vec<String>,
    /// Printers whose servicing hit an unexpected error.
    pub errors: Vec<(String, String)>,
}

pub struct Scheduler {
    service: Arc<KeepaliveService>,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    discovery_interval: chrono::Duration,
    publisher: Option<Arc<dyn StatePublisher>>,
    tick_interval: Duration,
    last_discovery_at: Option<DateTime<Utc>>,
    phase: watch::Sender<SchedulerPhase>,
}

impl Scheduler {
    pub fn new(service: Arc<KeepaliveService>, tick_interval: Duration) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            service,
            discovery: None,
            discovery_interval: chrono::Duration::minutes(180),
            publisher: None,
            tick_interval,
            last_discovery_at: None,
            phase,
        }
    }

    pub fn with_discovery(mut self, provider: Arc<dyn DiscoveryProvider>, interval: chrono::Duration) -> Self {
        self.discovery = Some(provider);
        self.discovery_interval = interval;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn StatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: SchedulerPhase) {
        self.phase.send_replace(phase);
    }

    /// One pass over discovery and every printer. Never fails: per-printer
    /// problems are logged and reported, and the pass moves on.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.service.now();

        if let Some(provider) = self.discovery.clone() {
            let due = self
                .last_discovery_at
                .is_none_or(|at| now - at >= self.discovery_interval);
            if due {
                self.enter(SchedulerPhase::Discovering);
                let started = Instant::now();
                let result = provider.scan(self.service.printers()).await;
                self.service.record_discovery(now, started.elapsed(), result);
                self.last_discovery_at = Some(now);
                report.discovery_ran = true;
            }
        }

        for printer in self.service.printers().to_vec() {
            self.enter(SchedulerPhase::Servicing(printer.id.clone()));
            if let Err(e) = self.service_printer(&printer.id, &mut report).await {
                error!(printer = %printer.id, error = %e, "scheduler pass failed for printer");
                report.errors.push((printer.id.clone(), e.to_string()));
            }
        }

        self.enter(SchedulerPhase::Idle);
        debug!(?report, "scheduler tick finished");
        report
    }

    async fn service_printer(&self, id: &str, report: &mut TickReport) -> keepalive_core::Result<()> {
        self.service.poll(id, false).await?;
        report.polled.push(id.to_owned());

        let decision = self.service.decision(id)?;
        if decision.needed && self.service.auto_print_enabled() {
            match self
                .service
                .run_keepalive(id, None, PrintSource::Scheduler, true)
                .await?
            {
                KeepaliveOutcome::Printed(_) => report.printed.push(id.to_owned()),
                KeepaliveOutcome::Failed(_) => report.failed.push(id.to_owned()),
                KeepaliveOutcome::Skipped { reason } => {
                    debug!(printer = %id, reason = %reason, "scheduled keepalive skipped");
                }
            }
        }

        if let Some(publisher) = &self.publisher {
            if publisher.is_connected() {
                let payload = self.service.payload(id)?;
                match publisher.publish_state(&payload).await {
                    Ok(()) => report.published.push(id.to_owned()),
                    Err(e) => warn!(printer = %id, error = %e, "state publish failed"),
                }
            }
        }
        Ok(())
    }

    /// Tick on the configured interval until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.tick_interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDiscovery, FakePublisher, Harness};
    use chrono::Duration as ChronoDuration;
    use keepalive_core::config::PrinterConfig;
    use keepalive_core::types::{DeviceClass, PrintSource};

    fn inkjet(id: &str) -> PrinterConfig {
        PrinterConfig::new(id, format!("ipp://{id}.local/ipp/print"), DeviceClass::Inkjet)
    }

    #[tokio::test]
    async fn prints_only_once_cadence_has_elapsed() {
        let h = Harness::new(vec![inkjet("p1")]);
        let mut scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30));
        let t0 = h.service.now();

        h.clock.advance(ChronoDuration::hours(167));
        let early = scheduler.tick().await;
        assert!(early.printed.is_empty());
        assert_eq!(early.polled, vec!["p1".to_owned()]);
        assert_eq!(h.submitter.submissions(), 0);

        h.clock.advance(ChronoDuration::hours(2));
        let due = scheduler.tick().await;
        assert_eq!(due.printed, vec!["p1".to_owned()]);
        assert_eq!(h.submitter.submissions(), 1);

        let state = h.store.snapshot("p1").unwrap();
        assert_eq!(state.last_keepalive_at, Some(t0 + ChronoDuration::hours(169)));
        assert_eq!(state.keepalive_print_count, 1);
        let rendered = h.renderer.rendered();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].2, PrintSource::Scheduler);
        assert_eq!(PrintSource::Scheduler.as_str(), "scheduler");

        h.clock.advance(ChronoDuration::minutes(30));
        let after = scheduler.tick().await;
        assert!(after.printed.is_empty());
        assert_eq!(h.submitter.submissions(), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test]
    async fn auto_print_off_never_prints() {
        let h = Harness::builder(vec![inkjet("p1")]).auto_print(false).build();
        let mut scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30));
        h.clock.advance(ChronoDuration::hours(500));
        let report = scheduler.tick().await;
        assert!(report.printed.is_empty());
        assert_eq!(h.submitter.submissions(), 0);
        assert!(h.service.decision("p1").unwrap().needed);
    }

    #[tokio::test]
    async fn one_printer_failing_does_not_stop_the_next() {
        let h = Harness::new(vec![inkjet("p1"), inkjet("p2")]);
        let mut scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30));
        h.device.push_error("no route to host");
        h.submitter.fail_next("printer offline");

        h.clock.advance(ChronoDuration::hours(200));
        let report = scheduler.tick().await;
        assert_eq!(report.polled.len(), 2);
        assert_eq!(report.failed, vec!["p1".to_owned()]);
        assert_eq!(report.printed, vec!["p2".to_owned()]);

        // The failed printer sits in cooldown on the next tick.
        h.clock.advance(ChronoDuration::minutes(1));
        let next = scheduler.tick().await;
        assert!(next.printed.is_empty());
        assert!(next.failed.is_empty());
    }

    #[tokio::test]
    async fn discovery_runs_on_its_own_interval() {
        let h = Harness::new(vec![inkjet("p1")]);
        let discovery = Arc::new(FakeDiscovery::with_candidates(vec![crate::testing::candidate(
            "ipp://10.0.0.77:631/ipp/print",
        )]));
        let mut scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30))
            .with_discovery(discovery.clone(), ChronoDuration::minutes(180));

        assert!(scheduler.tick().await.discovery_ran);
        h.clock.advance(ChronoDuration::minutes(60));
        assert!(!scheduler.tick().await.discovery_ran);
        h.clock.advance(ChronoDuration::minutes(121));
        assert!(scheduler.tick().await.discovery_ran);

        assert_eq!(discovery.scans(), 2);
        assert_eq!(h.service.discovery_snapshot().candidates.len(), 1);
    }

    #[tokio::test]
    async fn publishes_only_while_connected() {
        let h = Harness::new(vec![inkjet("p1"), inkjet("p2")]);
        let publisher = Arc::new(FakePublisher::new(false));
        let mut scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30))
            .with_publisher(publisher.clone());

        assert!(scheduler.tick().await.published.is_empty());
        publisher.set_connected(true);
        let report = scheduler.tick().await;
        assert_eq!(report.published, vec!["p1".to_owned(), "p2".to_owned()]);
        assert_eq!(publisher.published_ids(), vec!["p1".to_owned(), "p2".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_signal() {
        let h = Harness::new(vec![inkjet("p1")]);
        let scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send_replace(true);
        task.await.unwrap();

        // Ticks at 0s, 30s and 60s.
        assert_eq!(h.device.query_count(), 1);
    }
}
