// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for Printer Keepalive.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cadence for inkjet printers (7 days).
pub const DEFAULT_INKJET_CADENCE_HOURS: u32 = 168;
/// Default cadence for laser printers (30 days).
pub const DEFAULT_LASER_CADENCE_HOURS: u32 = 720;
/// Default cadence when the device class is unknown (14 days).
pub const DEFAULT_UNKNOWN_CADENCE_HOURS: u32 = 336;

/// Lower bound for any cadence, configured or overridden.
pub const MIN_CADENCE_HOURS: u32 = 1;
/// Upper bound for any cadence, configured or overridden.
pub const MAX_CADENCE_HOURS: u32 = 720;

/// Clamp a raw cadence into the supported range.
pub fn clamp_cadence(hours: i64) -> u32 {
    hours.clamp(MIN_CADENCE_HOURS as i64, MAX_CADENCE_HOURS as i64) as u32
}

/// Broad printer technology, which drives the default cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Inkjet,
    Laser,
    Unknown,
}

impl DeviceClass {
    /// Case-insensitive parse; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inkjet" => Self::Inkjet,
            "laser" => Self::Laser,
            _ => Self::Unknown,
        }
    }

    pub fn default_cadence_hours(&self) -> u32 {
        match self {
            Self::Inkjet => DEFAULT_INKJET_CADENCE_HOURS,
            Self::Laser => DEFAULT_LASER_CADENCE_HOURS,
            Self::Unknown => DEFAULT_UNKNOWN_CADENCE_HOURS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inkjet => "inkjet",
            Self::Laser => "laser",
            Self::Unknown => "unknown",
        }
    }

    /// Guess the class from free text such as a printer name or make/model.
    /// Laser keywords are checked first.
    pub fn infer_from_text(values: &[&str]) -> Self {
        const LASER: &[&str] = &[
            "laser", "toner", "imageclass", "ecosys", "lbp", "hl-l", "phaser",
        ];
        const INKJET: &[&str] = &[
            "ink", "ecotank", "officejet", "deskjet", "pixma", "et-", "wf-",
        ];

        let combined = values
            .iter()
            .map(|v| v.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        if LASER.iter().any(|k| combined.contains(k)) {
            Self::Laser
        } else if INKJET.iter().any(|k| combined.contains(k)) {
            Self::Inkjet
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of maintenance page templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    ColorBars,
    #[default]
    HomeSummary,
    WeatherSnapshot,
    EntityReport,
    Hybrid,
}

impl Template {
    pub const ALL: [Template; 5] = [
        Template::ColorBars,
        Template::HomeSummary,
        Template::WeatherSnapshot,
        Template::EntityReport,
        Template::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColorBars => "color_bars",
            Self::HomeSummary => "home_summary",
            Self::WeatherSnapshot => "weather_snapshot",
            Self::EntityReport => "entity_report",
            Self::Hybrid => "hybrid",
        }
    }

    /// Keyword list, in display order, for selector UIs.
    pub fn keywords() -> Vec<&'static str> {
        Self::ALL.iter().map(Template::as_str).collect()
    }
}

impl FromStr for Template {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unsupported template '{}'", s.trim()))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent keepalive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepaliveResult {
    #[default]
    Never,
    Success,
    Failed,
}

impl KeepaliveResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Who asked for a keepalive print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintSource {
    Scheduler,
    Mqtt,
    Api,
}

impl PrintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Mqtt => "mqtt",
            Self::Api => "api",
        }
    }

    /// Label printed on the maintenance page.
    pub fn trigger_label(&self) -> &'static str {
        match self {
            Self::Scheduler => "Automatic scheduler",
            Self::Mqtt => "Home Assistant MQTT command",
            Self::Api => "API request",
        }
    }
}

impl fmt::Display for PrintSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised IPP `printer-state`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceState {
    Idle,
    Processing,
    Stopped,
    #[default]
    Unknown,
    Other(String),
}

impl DeviceState {
    /// Normalise a raw `printer-state` value (IPP enum 3/4/5 or a keyword).
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw.trim().trim_matches('"').to_ascii_lowercase();
        match cleaned.as_str() {
            "3" | "idle" => Self::Idle,
            "4" | "processing" => Self::Processing,
            "5" | "stopped" => Self::Stopped,
            "" | "unknown" => Self::Unknown,
            _ => Self::Other(cleaned),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for DeviceState {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DeviceState> for String {
    fn from(value: DeviceState) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format of a rendered maintenance page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Jpeg,
}

impl DocumentFormat {
    /// MIME type string for IPP `document-format`.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpg",
        }
    }
}

/// Durable per-printer record of observed history and settings overrides.
///
/// Device-reported fields are "last known good": a failed poll never clears
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterState {
    /// Creation time; stands in for unknown prior print history.
    pub history_anchor_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,

    // -- Keepalive history --
    pub last_keepalive_at: Option<DateTime<Utc>>,
    pub last_keepalive_attempt_at: Option<DateTime<Utc>>,
    pub last_keepalive_result: KeepaliveResult,
    pub last_keepalive_error: Option<String>,
    pub keepalive_print_count: u64,

    // -- Prints the service did not submit --
    pub last_external_print_at: Option<DateTime<Utc>>,
    pub external_print_count: u64,
    pub last_seen_job_impressions: Option<i64>,

    // -- Device-reported --
    pub printer_state: DeviceState,
    pub printer_state_reasons: Vec<String>,
    pub printer_state_message: String,
    pub printer_is_accepting_jobs: Option<bool>,
    pub queued_job_count: Option<i64>,
    pub job_impressions_completed: Option<i64>,
    pub marker_levels: Vec<i64>,
    pub marker_names: Vec<String>,
    pub marker_colors: Vec<String>,
    pub printer_make_and_model: String,
    pub printer_name: String,
    pub printer_uuid: String,
    pub printer_up_time_seconds: Option<i64>,
    pub media_sheets_completed: Option<i64>,
    pub last_error: Option<String>,

    // -- Overrides (sticky until replaced or cleared) --
    pub template_override: Option<Template>,
    pub cadence_hours_override: Option<u32>,
    pub enabled_override: Option<bool>,
}

impl Default for PrinterState {
    fn default() -> Self {
        Self {
            history_anchor_at: None,
            last_polled_at: None,
            last_keepalive_at: None,
            last_keepalive_attempt_at: None,
            last_keepalive_result: KeepaliveResult::Never,
            last_keepalive_error: None,
            keepalive_print_count: 0,
            last_external_print_at: None,
            external_print_count: 0,
            last_seen_job_impressions: None,
            printer_state: DeviceState::Unknown,
            printer_state_reasons: Vec::new(),
            printer_state_message: String::new(),
            printer_is_accepting_jobs: None,
            queued_job_count: None,
            job_impressions_completed: None,
            marker_levels: Vec::new(),
            marker_names: Vec::new(),
            marker_colors: Vec::new(),
            printer_make_and_model: String::new(),
            printer_name: String::new(),
            printer_uuid: String::new(),
            printer_up_time_seconds: None,
            media_sheets_completed: None,
            last_error: None,
            template_override: None,
            cadence_hours_override: None,
            enabled_override: None,
        }
    }
}

impl PrinterState {
    /// A fresh record anchored at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            history_anchor_at: Some(now),
            ..Self::default()
        }
    }

    /// Record a successful keepalive submission.
    pub fn record_keepalive_success(&mut self, at: DateTime<Utc>) {
        self.last_keepalive_attempt_at = Some(at);
        self.last_keepalive_at = Some(at);
        self.keepalive_print_count += 1;
        self.last_keepalive_result = KeepaliveResult::Success;
        self.last_keepalive_error = None;
        self.last_error = None;
    }

    /// Record a failed keepalive attempt. The attempt time drives the cooldown.
    pub fn record_keepalive_failure(&mut self, at: DateTime<Utc>, details: &str) {
        self.last_keepalive_attempt_at = Some(at);
        self.last_keepalive_result = KeepaliveResult::Failed;
        self.last_keepalive_error = Some(details.to_owned());
        self.last_error = Some(details.to_owned());
    }

    pub fn clear_overrides(&mut self) {
        self.template_override = None;
        self.cadence_hours_override = None;
        self.enabled_override = None;
    }
}

/// A printer candidate found on the network by the discovery provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub service_name: String,
    pub uri: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub reachable: bool,
    pub error: Option<String>,
    pub printer_name: String,
    pub make_and_model: String,
    pub device_class_guess: DeviceClass,
    pub already_configured: bool,
}

/// Last discovery scan, as exposed to read paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySnapshot {
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_duration_seconds: f64,
    pub last_error: Option<String>,
    pub candidates: Vec<DiscoveryCandidate>,
}
