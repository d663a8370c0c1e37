// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device observations: parsing a flattened IPP attribute map and folding it
// into a PrinterState with last-known-good semantics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{DeviceState, PrinterState};

/// Flattened `printer-attributes` group: attribute name to display string.
/// Multi-valued attributes are comma-joined.
pub type AttributeMap = HashMap<String, String>;

/// One successful status query, already normalised. `None` means the device
/// did not report that attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceObservation {
    pub printer_state: Option<DeviceState>,
    pub printer_state_reasons: Option<Vec<String>>,
    pub printer_state_message: Option<String>,
    pub printer_is_accepting_jobs: Option<bool>,
    pub queued_job_count: Option<i64>,
    pub job_impressions_completed: Option<i64>,
    pub marker_levels: Option<Vec<i64>>,
    pub marker_names: Option<Vec<String>>,
    pub marker_colors: Option<Vec<String>>,
    pub printer_make_and_model: Option<String>,
    pub printer_name: Option<String>,
    pub printer_uuid: Option<String>,
    pub printer_up_time_seconds: Option<i64>,
    pub media_sheets_completed: Option<i64>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_matches('"').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl DeviceObservation {
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        let get = |name: &str| attrs.get(name).map(String::as_str);
        let text = |name: &str| get(name).map(|v| v.trim().to_owned());

        Self {
            printer_state: get("printer-state").map(DeviceState::parse),
            printer_state_reasons: get("printer-state-reasons").map(split_list),
            printer_state_message: text("printer-state-message"),
            printer_is_accepting_jobs: get("printer-is-accepting-jobs").and_then(parse_bool),
            queued_job_count: get("queued-job-count").and_then(parse_int),
            job_impressions_completed: get("job-impressions-completed").and_then(parse_int),
            marker_levels: get("marker-levels")
                .map(|v| split_list(v).iter().filter_map(|l| parse_int(l)).collect()),
            marker_names: get("marker-names").map(split_list),
            marker_colors: get("marker-colors").map(split_list),
            printer_make_and_model: text("printer-make-and-model"),
            printer_name: text("printer-name"),
            printer_uuid: text("printer-uuid"),
            printer_up_time_seconds: get("printer-up-time").and_then(parse_int),
            media_sheets_completed: get("media-sheets-completed").and_then(parse_int),
        }
    }
}

fn keep_or_replace<T>(slot: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming {
        *slot = value;
    }
}

impl PrinterState {
    /// Fold a successful poll into the record.
    ///
    /// Attributes the device did not report keep their previous value. A rise
    /// in the impression counter is attributed to prints this service did not
    /// submit. Returns the number of external impressions detected.
    pub fn apply_observation(&mut self, obs: DeviceObservation, now: DateTime<Utc>) -> u64 {
        self.last_polled_at = Some(now);
        self.last_error = None;

        keep_or_replace(&mut self.printer_state, obs.printer_state);
        keep_or_replace(&mut self.printer_state_reasons, obs.printer_state_reasons);
        keep_or_replace(&mut self.printer_state_message, obs.printer_state_message);
        keep_or_replace(&mut self.marker_levels, obs.marker_levels);
        keep_or_replace(&mut self.marker_names, obs.marker_names);
        keep_or_replace(&mut self.marker_colors, obs.marker_colors);
        keep_or_replace(&mut self.printer_make_and_model, obs.printer_make_and_model);
        keep_or_replace(&mut self.printer_name, obs.printer_name);
        keep_or_replace(&mut self.printer_uuid, obs.printer_uuid);

        if obs.printer_is_accepting_jobs.is_some() {
            self.printer_is_accepting_jobs = obs.printer_is_accepting_jobs;
        }
        if obs.queued_job_count.is_some() {
            self.queued_job_count = obs.queued_job_count;
        }
        if obs.printer_up_time_seconds.is_some() {
            self.printer_up_time_seconds = obs.printer_up_time_seconds;
        }
        if obs.media_sheets_completed.is_some() {
            self.media_sheets_completed = obs.media_sheets_completed;
        }

        let Some(impressions) = obs.job_impressions_completed else {
            return 0;
        };
        self.job_impressions_completed = Some(impressions);

        let delta = self
            .last_seen_job_impressions
            .and_then(|previous| impressions.checked_sub(previous))
            .and_then(|d| u64::try_from(d).ok())
            .unwrap_or(0);
        if delta > 0 {
            self.external_print_count = self.external_print_count.saturating_add(delta);
            self.last_external_print_at = Some(now);
        }
        self.last_seen_job_impressions = Some(impressions);
        delta
    }

    /// Record a failed poll. Device-observed fields are left untouched.
    pub fn record_poll_failure(&mut self, now: DateTime<Utc>, error: &str) {
        self.last_polled_at = Some(now);
        self.last_error = Some(error.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn parses_typical_attribute_map() {
        let obs = DeviceObservation::from_attributes(&attrs(&[
            ("printer-state", "4"),
            ("printer-state-reasons", "media-low-warning, toner-low-report"),
            ("printer-is-accepting-jobs", "true"),
            ("queued-job-count", "2"),
            ("marker-levels", "80,45,-1,12"),
            ("marker-names", "Black,Cyan,Magenta,Yellow"),
            ("job-impressions-completed", "1234"),
            ("printer-make-and-model", "  EPSON ET-3850 Series "),
        ]));

        assert_eq!(obs.printer_state, Some(DeviceState::Processing));
        assert_eq!(
            obs.printer_state_reasons,
            Some(vec!["media-low-warning".into(), "toner-low-report".into()])
        );
        assert_eq!(obs.printer_is_accepting_jobs, Some(true));
        assert_eq!(obs.queued_job_count, Some(2));
        assert_eq!(obs.marker_levels, Some(vec![80, 45, -1, 12]));
        assert_eq!(obs.job_impressions_completed, Some(1234));
        assert_eq!(obs.printer_make_and_model.as_deref(), Some("EPSON ET-3850 Series"));
        assert!(obs.printer_uuid.is_none());
    }

    #[test]
    fn impression_sequence_counts_only_increases() {
        let t0 = Utc::now();
        let mut state = PrinterState::new(t0);
        let obs = |n: i64| DeviceObservation {
            job_impressions_completed: Some(n),
            ..DeviceObservation::default()
        };

        assert_eq!(state.apply_observation(obs(10), t0), 0);
        assert_eq!(state.external_print_count, 0);
        assert!(state.last_external_print_at.is_none());

        let t1 = t0 + Duration::minutes(15);
        assert_eq!(state.apply_observation(obs(10), t1), 0);
        assert_eq!(state.external_print_count, 0);
        assert!(state.last_external_print_at.is_none());

        let t2 = t1 + Duration::minutes(15);
        assert_eq!(state.apply_observation(obs(25), t2), 15);
        assert_eq!(state.external_print_count, 15);
        assert_eq!(state.last_external_print_at, Some(t2));
        assert_eq!(state.last_seen_job_impressions, Some(25));
    }

    #[test]
    fn counter_reset_is_not_an_external_print() {
        let t0 = Utc::now();
        let mut state = PrinterState::new(t0);
        state.last_seen_job_impressions = Some(500);
        let obs = DeviceObservation {
            job_impressions_completed: Some(3),
            ..DeviceObservation::default()
        };
        assert_eq!(state.apply_observation(obs, t0), 0);
        assert_eq!(state.last_seen_job_impressions, Some(3));
        assert_eq!(state.external_print_count, 0);
    }

    #[test]
    fn extreme_counters_do_not_overflow() {
        let t0 = Utc::now();
        let obs = |n: i64| DeviceObservation {
            job_impressions_completed: Some(n),
            ..DeviceObservation::default()
        };

        let mut state = PrinterState::new(t0);
        state.last_seen_job_impressions = Some(i64::MIN);
        assert_eq!(state.apply_observation(obs(i64::MAX), t0), 0);
        assert_eq!(state.external_print_count, 0);
        assert_eq!(state.last_seen_job_impressions, Some(i64::MAX));

        let mut state = PrinterState::new(t0);
        state.last_seen_job_impressions = Some(-5);
        state.external_print_count = u64::MAX - 2;
        assert_eq!(state.apply_observation(obs(5), t0), 10);
        assert_eq!(state.external_print_count, u64::MAX);
    }

    #[test]
    fn partial_observation_keeps_previous_values() {
        let t0 = Utc::now();
        let mut state = PrinterState::new(t0);
        state.printer_make_and_model = "Brother HL-L2350DW".into();
        state.marker_levels = vec![70];
        state.queued_job_count = Some(1);
        state.last_error = Some("timeout".into());

        let obs = DeviceObservation {
            printer_state: Some(DeviceState::Idle),
            ..DeviceObservation::default()
        };
        state.apply_observation(obs, t0);

        assert_eq!(state.printer_state, DeviceState::Idle);
        assert_eq!(state.printer_make_and_model, "Brother HL-L2350DW");
        assert_eq!(state.marker_levels, vec![70]);
        assert_eq!(state.queued_job_count, Some(1));
        assert!(state.last_error.is_none());
    }

    #[test]
    fn poll_failure_preserves_device_fields() {
        let t0 = Utc::now();
        let mut state = PrinterState::new(t0);
        state.printer_state = DeviceState::Idle;
        state.marker_levels = vec![40, 50];

        let later = t0 + Duration::minutes(20);
        state.record_poll_failure(later, "connection refused");

        assert_eq!(state.printer_state, DeviceState::Idle);
        assert_eq!(state.marker_levels, vec![40, 50]);
        assert_eq!(state.last_polled_at, Some(later));
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
    }
}
