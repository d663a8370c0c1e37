// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keepalive decision engine: pure functions over (config, state, now).
//
// Nothing in this module performs I/O or reads the clock. The same inputs
// always produce the same outputs.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::PrinterConfig;
use crate::types::{DeviceState, PrintSource, PrinterState, Template, clamp_cadence};

/// Consumable level (percent) at or below which health degrades to warning.
pub const LOW_MARKER_THRESHOLD: i64 = 10;

// ---------------------------------------------------------------------------
// Effective settings
// ---------------------------------------------------------------------------

/// Override-if-present-else-default projection of the tunable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveSettings {
    pub enabled: bool,
    pub template: Template,
    pub cadence_hours: u32,
}

pub fn effective_settings(config: &PrinterConfig, state: &PrinterState) -> EffectiveSettings {
    EffectiveSettings {
        enabled: state.enabled_override.unwrap_or(config.enabled),
        template: state.template_override.unwrap_or(config.template),
        cadence_hours: state
            .cadence_hours_override
            .map(|h| clamp_cadence(i64::from(h)))
            .unwrap_or(config.cadence_hours),
    }
}

// ---------------------------------------------------------------------------
// Due-ness
// ---------------------------------------------------------------------------

/// Latest of the keepalive, external-print and history-anchor timestamps.
pub fn last_print_time(state: &PrinterState) -> Option<DateTime<Utc>> {
    [
        state.last_keepalive_at,
        state.last_external_print_at,
        state.history_anchor_at,
    ]
    .into_iter()
    .flatten()
    .max()
}

/// Result of evaluating one printer at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeepaliveDecision {
    pub needed: bool,
    pub last_print_at: Option<DateTime<Utc>>,
    /// `None` when disabled or when there is no baseline.
    pub due_at: Option<DateTime<Utc>>,
    pub settings: EffectiveSettings,
    pub reason: String,
}

impl KeepaliveDecision {
    /// Hours since the last known print, rounded to two decimals.
    pub fn hours_since_last_print(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_print_at
            .map(|at| ((now - at).num_seconds() as f64 / 3600.0 * 100.0).round() / 100.0)
    }
}

pub fn evaluate(config: &PrinterConfig, state: &PrinterState, now: DateTime<Utc>) -> KeepaliveDecision {
    let settings = effective_settings(config, state);
    let last_print_at = last_print_time(state);

    if !settings.enabled {
        return KeepaliveDecision {
            needed: false,
            last_print_at,
            due_at: None,
            settings,
            reason: "Keepalive is disabled for this printer.".into(),
        };
    }

    let Some(last) = last_print_at else {
        return KeepaliveDecision {
            needed: false,
            last_print_at: None,
            due_at: None,
            settings,
            reason: "No print history baseline to measure from.".into(),
        };
    };

    let due_at = last + Duration::hours(i64::from(settings.cadence_hours));
    let needed = now >= due_at;
    let reason = if needed {
        format!(
            "Keepalive due since {} (cadence {}h).",
            due_at.to_rfc3339(),
            settings.cadence_hours
        )
    } else {
        format!(
            "Next keepalive due at {} (cadence {}h).",
            due_at.to_rfc3339(),
            settings.cadence_hours
        )
    };

    KeepaliveDecision {
        needed,
        last_print_at: Some(last),
        due_at: Some(due_at),
        settings,
        reason,
    }
}

/// Justification rendered on a maintenance page.
pub fn describe_print_reason(
    source: PrintSource,
    only_if_needed: bool,
    decision: &KeepaliveDecision,
    now: DateTime<Utc>,
) -> String {
    let cadence = decision.settings.cadence_hours;
    if only_if_needed {
        let Some(last) = decision.last_print_at else {
            return "No previous print history; keepalive requested.".into();
        };
        let elapsed = (now - last).num_seconds() as f64 / 3600.0;
        return match decision.due_at {
            Some(due) if now > due => {
                let overdue = (now - due).num_seconds() as f64 / 3600.0;
                format!(
                    "Keepalive was overdue by {overdue:.1}h ({elapsed:.1}h since last print, cadence {cadence}h)."
                )
            }
            _ => format!(
                "Keepalive was due by cadence ({elapsed:.1}h since last print, cadence {cadence}h)."
            ),
        };
    }

    match source {
        PrintSource::Mqtt => "Manual keepalive requested from Home Assistant MQTT control.".into(),
        PrintSource::Api => "Manual keepalive requested from API with force enabled.".into(),
        PrintSource::Scheduler => "Manual keepalive requested.".into(),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Busy,
    Healthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Busy => "busy",
            Self::Healthy => "healthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub summary: String,
}

impl Health {
    fn new(status: HealthStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            summary: summary.into(),
        }
    }
}

/// Lowest reported consumable level. Negative IPP sentinels (unknown,
/// unavailable) are not percentages and are skipped.
pub fn lowest_marker_level(state: &PrinterState) -> Option<i64> {
    state.marker_levels.iter().copied().filter(|l| *l >= 0).min()
}

/// First-match classification. Stopped and error conditions dominate low
/// supplies, which dominate busy and other reasons.
pub fn evaluate_health(state: &PrinterState) -> Health {
    let reasons = &state.printer_state_reasons;
    let joined = || reasons.join(", ");

    if state.printer_state == DeviceState::Stopped {
        return Health::new(HealthStatus::Critical, "Printer state is stopped.");
    }
    if reasons.iter().any(|r| r.contains("error")) {
        return Health::new(
            HealthStatus::Critical,
            format!("Printer reported error reason(s): {}", joined()),
        );
    }
    if lowest_marker_level(state).is_some_and(|l| l <= LOW_MARKER_THRESHOLD) {
        return Health::new(HealthStatus::Warning, "One or more consumables are low.");
    }
    if state.printer_state == DeviceState::Processing {
        return Health::new(HealthStatus::Busy, "Printer is currently processing jobs.");
    }
    if reasons.iter().any(|r| !r.is_empty() && r != "none") {
        return Health::new(
            HealthStatus::Warning,
            format!("Printer reason(s): {}", joined()),
        );
    }
    Health::new(HealthStatus::Healthy, "Printer appears healthy.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceClass;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn p1() -> PrinterConfig {
        PrinterConfig::new("p1", "ipp://p1.local/ipp/print", DeviceClass::Inkjet).with_cadence(168)
    }

    #[test]
    fn disabled_printer_is_never_due() {
        let config = p1().with_enabled(false);
        let state = PrinterState::new(t0());
        for hours in [0, 167, 169, 10_000] {
            let d = evaluate(&config, &state, t0() + Duration::hours(hours));
            assert!(!d.needed);
            assert!(d.due_at.is_none());
        }

        let mut enabled_by_config = PrinterState::new(t0());
        enabled_by_config.enabled_override = Some(false);
        assert!(!evaluate(&p1(), &enabled_by_config, t0() + Duration::days(90)).needed);
    }

    #[test]
    fn anchor_is_the_baseline_without_history() {
        let state = PrinterState::new(t0());
        assert_eq!(last_print_time(&state), Some(t0()));

        let at_anchor = evaluate(&p1(), &state, t0());
        assert!(!at_anchor.needed);

        let later = evaluate(&p1(), &state, t0() + Duration::hours(169));
        assert!(later.needed);
        assert_eq!(later.due_at, Some(t0() + Duration::hours(168)));
    }

    #[test]
    fn no_baseline_means_not_due() {
        let state = PrinterState::default();
        let d = evaluate(&p1(), &state, t0() + Duration::days(365));
        assert!(!d.needed);
        assert!(d.last_print_at.is_none());
    }

    #[test]
    fn latest_history_timestamp_wins() {
        let mut state = PrinterState::new(t0());
        state.last_keepalive_at = Some(t0() + Duration::hours(10));
        state.last_external_print_at = Some(t0() + Duration::hours(50));
        assert_eq!(last_print_time(&state), Some(t0() + Duration::hours(50)));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut state = PrinterState::new(t0());
        state.cadence_hours_override = Some(12);
        let now = t0() + Duration::hours(30);
        assert_eq!(evaluate(&p1(), &state, now), evaluate(&p1(), &state, now));
    }

    #[test]
    fn overrides_take_precedence_per_field() {
        let config = p1();
        let mut state = PrinterState::new(t0());
        state.cadence_hours_override = Some(24);

        let settings = effective_settings(&config, &state);
        assert_eq!(settings.cadence_hours, 24);
        assert_eq!(settings.template, config.template);
        assert!(settings.enabled);
        assert!(evaluate(&config, &state, t0() + Duration::hours(25)).needed);
        assert_eq!(config.cadence_hours, 168);

        state.cadence_hours_override = Some(5000);
        assert_eq!(effective_settings(&config, &state).cadence_hours, 720);
    }

    #[test]
    fn reason_text_for_scheduled_and_manual_prints() {
        let state = PrinterState::new(t0());
        let now = t0() + Duration::hours(170);
        let d = evaluate(&p1(), &state, now);
        assert_eq!(
            describe_print_reason(PrintSource::Scheduler, true, &d, now),
            "Keepalive was overdue by 2.0h (170.0h since last print, cadence 168h)."
        );
        assert_eq!(
            describe_print_reason(PrintSource::Mqtt, false, &d, now),
            "Manual keepalive requested from Home Assistant MQTT control."
        );
        let exact = t0() + Duration::hours(168);
        let d = evaluate(&p1(), &state, exact);
        assert!(describe_print_reason(PrintSource::Scheduler, true, &d, exact)
            .starts_with("Keepalive was due by cadence"));
    }

    #[test]
    fn health_rules_apply_in_order() {
        let mut state = PrinterState::new(t0());
        assert_eq!(evaluate_health(&state).status, HealthStatus::Healthy);

        state.printer_state_reasons = vec!["none".into()];
        assert_eq!(evaluate_health(&state).status, HealthStatus::Healthy);

        state.printer_state_reasons = vec!["media-low-warning".into()];
        assert_eq!(evaluate_health(&state).status, HealthStatus::Warning);

        state.printer_state = DeviceState::Processing;
        assert_eq!(evaluate_health(&state).status, HealthStatus::Busy);

        state.marker_levels = vec![-1, 80, 9];
        assert_eq!(evaluate_health(&state).status, HealthStatus::Warning);
        assert_eq!(
            evaluate_health(&state).summary,
            "One or more consumables are low."
        );

        state.printer_state_reasons = vec!["media-jam-error".into()];
        let health = evaluate_health(&state);
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.summary.contains("media-jam-error"));

        state.printer_state = DeviceState::Stopped;
        assert_eq!(evaluate_health(&state).summary, "Printer state is stopped.");
    }

    #[test]
    fn unknown_marker_sentinels_are_not_low() {
        let mut state = PrinterState::new(t0());
        state.marker_levels = vec![-1, -3, 55];
        assert_eq!(lowest_marker_level(&state), Some(55));
        assert_eq!(evaluate_health(&state).status, HealthStatus::Healthy);
    }
}
