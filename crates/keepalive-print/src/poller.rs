// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device poller: queries a printer's status and reconciles it into the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use keepalive_core::clock::Clock;
use keepalive_core::config::PrinterConfig;
use keepalive_core::error::Result;
use keepalive_core::observation::DeviceObservation;
use keepalive_core::types::PrinterState;

use crate::device::DeviceQuery;
use crate::store::StateStore;

pub struct DevicePoller {
    device: Arc<dyn DeviceQuery>,
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    min_interval: chrono::Duration,
    query_timeout: Duration,
}

impl DevicePoller {
    pub fn new(
        device: Arc<dyn DeviceQuery>,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        min_interval: chrono::Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            device,
            store,
            clock,
            min_interval,
            query_timeout,
        }
    }

    /// Refresh the record for `printer` and return it.
    ///
    /// Skipped (returning the stored record) when the last poll is younger
    /// than the minimum interval, unless `force` is set. Device failures are
    /// recorded in the state, never returned; `Err` means the store failed.
    #[instrument(skip(self, printer), fields(printer = %printer.id))]
    pub async fn poll(&self, printer: &PrinterConfig, force: bool) -> Result<PrinterState> {
        let now = self.clock.now();
        let (fresh, current) = self.store.read(&printer.id, now, |state| {
            let fresh = state
                .last_polled_at
                .is_some_and(|at| now - at < self.min_interval);
            (fresh, state.clone())
        })?;
        if fresh && !force {
            debug!("poll throttled");
            return Ok(current);
        }

        // No lock held across the network call.
        let outcome = self
            .device
            .query_attributes(&printer.uri, self.query_timeout)
            .await;

        let now = self.clock.now();
        match outcome {
            Ok(attrs) => {
                let observation = DeviceObservation::from_attributes(&attrs);
                self.store.update(&printer.id, now, |state| {
                    let external = state.apply_observation(observation, now);
                    if external > 0 {
                        debug!(external, total = state.external_print_count, "external impressions detected");
                    }
                    state.clone()
                })
            }
            Err(e) => {
                warn!(error = %e, "status poll failed");
                let message = e.to_string();
                self.store
                    .update(&printer.id, now, |state| {
                        state.record_poll_failure(now, &message);
                        state.clone()
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;
    use chrono::{TimeZone, Utc};
    use keepalive_core::clock::ManualClock;
    use keepalive_core::types::{DeviceClass, DeviceState};

    fn setup(
        device: Arc<FakeDevice>,
    ) -> (DevicePoller, Arc<StateStore>, Arc<ManualClock>, PrinterConfig) {
        let store = Arc::new(StateStore::in_memory());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()));
        let poller = DevicePoller::new(
            device,
            Arc::clone(&store),
            clock.clone(),
            chrono::Duration::minutes(15),
            Duration::from_secs(5),
        );
        let printer = PrinterConfig::new("office", "ipp://10.0.0.5:631/ipp/print", DeviceClass::Inkjet);
        (poller, store, clock, printer)
    }

    #[tokio::test]
    async fn impression_sequence_counts_external_prints() {
        let device = Arc::new(FakeDevice::new());
        let (poller, _store, clock, printer) = setup(Arc::clone(&device));

        device.push_impressions(10);
        device.push_impressions(10);
        device.push_impressions(25);

        let first = poller.poll(&printer, true).await.unwrap();
        assert_eq!(first.external_print_count, 0);
        assert_eq!(first.last_seen_job_impressions, Some(10));

        clock.advance(chrono::Duration::minutes(20));
        let second = poller.poll(&printer, false).await.unwrap();
        assert_eq!(second.external_print_count, 0);
        assert!(second.last_external_print_at.is_none());

        clock.advance(chrono::Duration::minutes(20));
        let third = poller.poll(&printer, false).await.unwrap();
        assert_eq!(third.external_print_count, 15);
        assert_eq!(third.last_external_print_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn recent_poll_is_throttled_unless_forced() {
        let device = Arc::new(FakeDevice::new());
        let (poller, _store, clock, printer) = setup(Arc::clone(&device));
        device.push_impressions(1);
        device.push_impressions(2);
        device.push_impressions(3);

        poller.poll(&printer, false).await.unwrap();
        clock.advance(chrono::Duration::minutes(5));
        poller.poll(&printer, false).await.unwrap();
        assert_eq!(device.query_count(), 1);

        poller.poll(&printer, true).await.unwrap();
        assert_eq!(device.query_count(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_last_known_good_values() {
        let device = Arc::new(FakeDevice::new());
        let (poller, store, clock, printer) = setup(Arc::clone(&device));

        device.push_attributes(&[
            ("printer-state", "3"),
            ("marker-levels", "80,40"),
            ("job-impressions-completed", "120"),
        ]);
        device.push_error("connection refused");

        poller.poll(&printer, true).await.unwrap();
        clock.advance(chrono::Duration::hours(1));
        let after = poller.poll(&printer, true).await.unwrap();

        assert_eq!(after.printer_state, DeviceState::Idle);
        assert_eq!(after.marker_levels, vec![80, 40]);
        assert_eq!(after.job_impressions_completed, Some(120));
        assert!(after.last_error.as_deref().unwrap_or("").contains("connection refused"));
        assert_eq!(after.last_polled_at, Some(clock.now()));
        assert_eq!(store.snapshot("office"), Some(after));
    }
}
