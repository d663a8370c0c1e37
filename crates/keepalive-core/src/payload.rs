// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Derived per-printer snapshot published to the hub and returned by read paths.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::PrinterConfig;
use crate::decision::{evaluate, evaluate_health, lowest_marker_level};
use crate::types::{DeviceClass, PrinterState};

/// Maintenance advice for a device class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guidance {
    pub summary: &'static str,
    pub default_cadence_hours: u32,
    pub recommended_range_days: &'static str,
    pub research_notes: &'static [&'static str],
    pub sources: &'static [&'static str],
}

pub fn guidance_for(class: DeviceClass) -> Guidance {
    match class {
        DeviceClass::Laser => Guidance {
            summary: "Laser toner is dry and generally less sensitive to idle periods than liquid ink, \
                      but periodic test prints still help catch media/fuser/supply issues before needed.",
            default_cadence_hours: class.default_cadence_hours(),
            recommended_range_days: "14-60 (model and environment dependent)",
            research_notes: &[
                "Canon toner guidance states toner does not carry the same dry-out risk as ink.",
                "Canon laser toner storage guidance focuses on temperature/humidity and packaging handling.",
            ],
            sources: &[
                "https://www.usa.canon.com/learning/training-articles/training-articles-list/printer-toner-vs-ink",
                "https://downloads.canon.com/cpr/pdf/Manuals/eManuals/LBP3480_eManual/us_LBP3480_Manual/contents/12010030.html",
            ],
        },
        DeviceClass::Inkjet | DeviceClass::Unknown => Guidance {
            summary: "Inkjet printheads can dry and clog when idle. Keepalive prints should \
                      include color output and run regularly.",
            default_cadence_hours: class.default_cadence_hours(),
            recommended_range_days: "7-30 (environment and model dependent)",
            research_notes: &[
                "Canon inkjet manual guidance recommends periodic printing at least monthly.",
                "Epson ET-3850 guidance emphasizes nozzle checks first and avoiding excessive cleanings due to ink use.",
            ],
            sources: &[
                "https://ij.manual.canon/ij/webmanual/Manual/All/TS8700%20series/EN/UG/ug-154.html",
                "https://download4.epson.biz/sec_pubs/et-3850_series/useg/en/GUID-381C0AF6-12DF-433B-9294-C8845DF3F126.htm",
                "https://download4.epson.biz/sec_pubs/et-3850_series/useg/en/GUID-69CE27D1-1CF9-4678-BA12-3C538DFFFE8A.htm",
            ],
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSupply {
    pub index: usize,
    pub name: String,
    pub level: Option<i64>,
    pub color: String,
}

/// Zip the three marker arrays, padding whichever is short.
pub fn marker_supplies(state: &PrinterState) -> Vec<MarkerSupply> {
    let count = state
        .marker_levels
        .len()
        .max(state.marker_names.len())
        .max(state.marker_colors.len());
    (0..count)
        .map(|index| MarkerSupply {
            index,
            name: state
                .marker_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("Supply {}", index + 1)),
            level: state.marker_levels.get(index).copied(),
            color: state.marker_colors.get(index).cloned().unwrap_or_default(),
        })
        .collect()
}

/// RFC 3339 with a `Z` suffix, or empty when absent.
pub fn iso_utc(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// JSON snapshot of one printer. Field names are the wire contract for the
/// `<prefix>/<id>/state` topic and the discovery value templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterPayload {
    pub printer_id: String,
    pub name: String,
    pub printer_uri: String,
    pub printer_type: DeviceClass,

    pub enabled: bool,
    pub template: String,
    pub cadence_hours: u32,

    pub keepalive_needed: bool,
    pub last_print_at: String,
    pub time_since_last_print_hours: Option<f64>,
    pub next_keepalive_due_at: String,

    pub keepalive_print_count: u64,
    pub last_keepalive_at: String,
    pub last_keepalive_result: String,
    pub last_keepalive_error: String,
    pub last_external_print_at: String,
    pub external_print_count: u64,
    pub last_polled_at: String,

    pub job_impressions_completed: Option<i64>,
    pub queued_job_count: Option<i64>,
    pub printer_state: String,
    pub printer_state_reasons: Vec<String>,
    pub printer_state_message: String,
    pub printer_is_accepting_jobs: Option<bool>,
    pub marker_levels: Vec<i64>,
    pub marker_names: Vec<String>,
    pub marker_colors: Vec<String>,
    pub lowest_marker_level: Option<i64>,
    pub marker_supplies: Vec<MarkerSupply>,
    pub printer_make_and_model: String,
    pub printer_name_from_ipp: String,
    pub printer_uuid: String,
    pub printer_up_time_seconds: Option<i64>,
    pub media_sheets_completed: Option<i64>,
    pub last_error: String,

    pub health_status: String,
    pub health_summary: String,
    pub guidance: Guidance,
}

impl PrinterPayload {
    pub fn build(config: &PrinterConfig, state: &PrinterState, now: DateTime<Utc>) -> Self {
        let decision = evaluate(config, state, now);
        let health = evaluate_health(state);

        Self {
            printer_id: config.id.clone(),
            name: config.name.clone(),
            printer_uri: config.uri.clone(),
            printer_type: config.device_class,

            enabled: decision.settings.enabled,
            template: decision.settings.template.as_str().to_owned(),
            cadence_hours: decision.settings.cadence_hours,

            keepalive_needed: decision.needed,
            last_print_at: iso_utc(decision.last_print_at),
            time_since_last_print_hours: decision.hours_since_last_print(now),
            next_keepalive_due_at: iso_utc(decision.due_at),

            keepalive_print_count: state.keepalive_print_count,
            last_keepalive_at: iso_utc(state.last_keepalive_at),
            last_keepalive_result: state.last_keepalive_result.as_str().to_owned(),
            last_keepalive_error: state.last_keepalive_error.clone().unwrap_or_default(),
            last_external_print_at: iso_utc(state.last_external_print_at),
            external_print_count: state.external_print_count,
            last_polled_at: iso_utc(state.last_polled_at),

            job_impressions_completed: state.job_impressions_completed,
            queued_job_count: state.queued_job_count,
            printer_state: state.printer_state.to_string(),
            printer_state_reasons: state.printer_state_reasons.clone(),
            printer_state_message: state.printer_state_message.clone(),
            printer_is_accepting_jobs: state.printer_is_accepting_jobs,
            marker_levels: state.marker_levels.clone(),
            marker_names: state.marker_names.clone(),
            marker_colors: state.marker_colors.clone(),
            lowest_marker_level: lowest_marker_level(state),
            marker_supplies: marker_supplies(state),
            printer_make_and_model: state.printer_make_and_model.clone(),
            printer_name_from_ipp: state.printer_name.clone(),
            printer_uuid: state.printer_uuid.clone(),
            printer_up_time_seconds: state.printer_up_time_seconds,
            media_sheets_completed: state.media_sheets_completed,
            last_error: state.last_error.clone().unwrap_or_default(),

            health_status: health.status.as_str().to_owned(),
            health_summary: health.summary,
            guidance: guidance_for(config.device_class),
        }
    }
}
