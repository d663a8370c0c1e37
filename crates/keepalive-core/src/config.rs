// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration, built once at startup from a JSON options document.
//
// Every option goes through one of the `coerce_*` helpers below, so the
// accepted shapes of each value are enumerated in one place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

use crate::error::{KeepaliveError, Result};
use crate::types::{DeviceClass, Template, clamp_cadence};

pub const APP_NAME: &str = "Printer Keepalive";
pub const DEFAULT_FOOTER: &str = "Generated by Home Assistant";
const DEFAULT_URI_PATH: &str = "/ipp/print";

// ---------------------------------------------------------------------------
// Coercion helpers
// ---------------------------------------------------------------------------

/// Permissive boolean: JSON bools, non-zero numbers, and the strings
/// `1/true/yes/on` (true) or `0/false/no/off` (false). Anything else, including
/// absence, yields `default`.
pub fn coerce_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        _ => default,
    }
}

/// Command-payload flag: `1/true/yes/on` is true, everything else false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Integer parse from a JSON number or numeric string.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Integer clamped into `[low, high]`; non-numeric or missing yields `default`.
pub fn coerce_int_clamped(value: Option<&Value>, default: i64, low: i64, high: i64) -> i64 {
    coerce_int(value).map_or(default, |n| n.clamp(low, high))
}

/// Trimmed string; non-strings and missing values yield `default`.
pub fn coerce_str(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_owned(),
        _ => default.to_owned(),
    }
}

/// List of trimmed, non-empty strings. Non-string items are dropped.
pub fn coerce_str_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Lowercase, collapse runs outside `[a-z0-9_-]` to `_`, trim `_`.
pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_gap = false;
    for ch in raw.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "printer".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Normalise a user-supplied printer address into an `ipp://` or `ipps://` URI.
///
/// A bare host gets `ipp://`, `http`/`https` map to `ipp`/`ipps`, and an
/// empty path becomes `/ipp/print`.
pub fn normalize_printer_uri(raw: &str) -> Result<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(KeepaliveError::Config("printer URI is empty".into()));
    }

    let with_scheme = if value.contains("://") {
        value.to_owned()
    } else {
        format!("ipp://{value}")
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|e| KeepaliveError::Config(format!("invalid printer URI '{value}': {e}")))?;

    let scheme = match parsed.scheme().to_ascii_lowercase().as_str() {
        "https" | "ipps" => "ipps",
        _ => "ipp",
    };

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| KeepaliveError::Config(format!("printer URI '{value}' has no host")))?;

    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let path = if segments.is_empty() {
        DEFAULT_URI_PATH.to_owned()
    } else {
        format!("/{}", segments.join("/"))
    };

    let mut normalized = format!("{scheme}://{authority}{path}");
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// Printer registry entries
// ---------------------------------------------------------------------------

/// One configured printer. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterConfig {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub device_class: DeviceClass,
    pub enabled: bool,
    pub cadence_hours: u32,
    pub template: Template,
    pub title: String,
    pub footer: String,
    pub weather_entity: Option<String>,
    pub entity_ids: Vec<String>,
}

impl PrinterConfig {
    /// A printer with class defaults and no metadata.
    pub fn new(id: impl Into<String>, uri: impl Into<String>, device_class: DeviceClass) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            uri: uri.into(),
            device_class,
            enabled: true,
            cadence_hours: device_class.default_cadence_hours(),
            template: Template::default(),
            title: APP_NAME.to_owned(),
            footer: DEFAULT_FOOTER.to_owned(),
            weather_entity: None,
            entity_ids: Vec::new(),
        }
    }

    pub fn with_cadence(mut self, hours: u32) -> Self {
        self.cadence_hours = clamp_cadence(i64::from(hours));
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Global values that individual printer entries inherit.
struct PrinterDefaults {
    template: Template,
    cadence_hours: Option<u32>,
    title: String,
    footer: String,
    weather_entity: String,
    entity_ids: Vec<String>,
}

impl PrinterDefaults {
    fn from_options(options: &Map<String, Value>) -> Self {
        Self {
            template: parse_template(options.get("default_template"), Template::default()),
            cadence_hours: coerce_int(options.get("auto_print_interval_hours")).map(clamp_cadence),
            title: non_empty(coerce_str(options.get("title"), APP_NAME))
                .unwrap_or_else(|| APP_NAME.to_owned()),
            footer: coerce_str(options.get("footer"), DEFAULT_FOOTER),
            weather_entity: coerce_str(options.get("weather_entity"), ""),
            entity_ids: coerce_str_list(options.get("entity_ids")),
        }
    }
}

fn parse_template(value: Option<&Value>, fallback: Template) -> Template {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

fn parse_printer_entry(
    entry: &Map<String, Value>,
    index: usize,
    defaults: &PrinterDefaults,
) -> Result<PrinterConfig> {
    let name = non_empty(coerce_str(entry.get("name"), ""))
        .unwrap_or_else(|| format!("Printer {}", index + 1));

    let raw_uri = coerce_str(entry.get("printer_uri"), "");
    let uri = normalize_printer_uri(&raw_uri)
        .map_err(|e| KeepaliveError::Config(format!("printer '{name}': {e}")))?;
    if uri != raw_uri {
        info!(printer = %name, from = %raw_uri, to = %uri, "normalized printer URI");
    }

    let id = slugify(&coerce_str(entry.get("id"), &name));
    let device_class = DeviceClass::parse(&coerce_str(entry.get("printer_type"), "inkjet"));

    let cadence_hours = coerce_int(entry.get("cadence_hours"))
        .map(clamp_cadence)
        .or(defaults.cadence_hours)
        .unwrap_or_else(|| device_class.default_cadence_hours());

    let entity_ids = if entry.get("entity_ids").is_some_and(Value::is_array) {
        coerce_str_list(entry.get("entity_ids"))
    } else {
        defaults.entity_ids.clone()
    };

    Ok(PrinterConfig {
        id,
        name,
        uri,
        device_class,
        enabled: coerce_bool(entry.get("enabled"), true),
        cadence_hours,
        template: parse_template(entry.get("template"), defaults.template),
        title: coerce_str(entry.get("title"), &defaults.title),
        footer: coerce_str(entry.get("footer"), &defaults.footer),
        weather_entity: non_empty(coerce_str(entry.get("weather_entity"), &defaults.weather_entity)),
        entity_ids,
    })
}

fn parse_printers(options: &Map<String, Value>) -> Vec<PrinterConfig> {
    let defaults = PrinterDefaults::from_options(options);
    let mut printers = Vec::new();

    if let Some(Value::Array(entries)) = options.get("printers") {
        for (index, entry) in entries.iter().enumerate() {
            let Some(entry) = entry.as_object() else {
                warn!(index, "ignoring printer entry that is not an object");
                continue;
            };
            match parse_printer_entry(entry, index, &defaults) {
                Ok(printer) => printers.push(printer),
                Err(e) => warn!(index, error = %e, "rejected printer entry"),
            }
        }
    }

    if printers.is_empty() {
        let legacy_uri = coerce_str(options.get("printer_uri"), "");
        if !legacy_uri.is_empty() {
            let mut legacy = Map::new();
            legacy.insert("id".into(), Value::from("printer_1"));
            legacy.insert("name".into(), Value::from("Printer 1"));
            legacy.insert("printer_uri".into(), Value::from(legacy_uri));
            if let Some(kind) = options.get("printer_type") {
                legacy.insert("printer_type".into(), kind.clone());
            }
            match parse_printer_entry(&legacy, 0, &defaults) {
                Ok(printer) => printers.push(printer),
                Err(e) => warn!(error = %e, "rejected legacy printer_uri"),
            }
        }
    }

    dedupe_ids(printers)
}

fn dedupe_ids(printers: Vec<PrinterConfig>) -> Vec<PrinterConfig> {
    let mut seen = HashSet::new();
    printers
        .into_iter()
        .enumerate()
        .map(|(index, mut printer)| {
            if seen.contains(&printer.id) {
                printer.id = slugify(&format!("{}_{}", printer.id, index + 1));
            }
            seen.insert(printer.id.clone());
            printer
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

/// Broker connection settings. Present only when the bridge should run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub tls: bool,
    pub discovery_prefix: String,
    pub topic_prefix: String,
    pub retain: bool,
    pub client_id: String,
}

impl MqttConfig {
    /// Returns `None` when the bridge is disabled or has nowhere to connect.
    fn from_options(options: &Map<String, Value>) -> Option<Self> {
        let empty = Map::new();
        let block = options.get("mqtt").and_then(Value::as_object).unwrap_or(&empty);

        if !coerce_bool(block.get("enabled"), true) {
            return None;
        }
        let host = coerce_str(block.get("host"), "");
        if host.is_empty() {
            warn!("MQTT is enabled but no host is configured; bridge disabled");
            return None;
        }

        Some(Self {
            host,
            port: coerce_int_clamped(block.get("port"), 1883, 1, 65535) as u16,
            username: non_empty(coerce_str(block.get("username"), "")),
            password: match block.get("password") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            },
            tls: coerce_bool(block.get("tls"), false),
            discovery_prefix: non_empty(coerce_str(block.get("discovery_prefix"), ""))
                .unwrap_or_else(|| "homeassistant".to_owned()),
            topic_prefix: non_empty(coerce_str(block.get("topic_prefix"), ""))
                .unwrap_or_else(|| "printer_keepalive".to_owned()),
            retain: coerce_bool(block.get("retain"), true),
            client_id: non_empty(coerce_str(block.get("client_id"), ""))
                .unwrap_or_else(|| format!("printer_keepalive_{}", std::process::id())),
        })
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub timeout_seconds: u32,
    pub ipp_query_timeout_seconds: u32,
    pub include_ipps: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 180,
            timeout_seconds: 6,
            ipp_query_timeout_seconds: 8,
            include_ipps: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Everything the daemon needs, validated once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    pub printers: Vec<PrinterConfig>,
    /// Global switch for scheduler-initiated prints.
    pub auto_print_enabled: bool,
    pub status_poll_interval_minutes: u32,
    /// Cooldown after a failed attempt before an automatic retry.
    pub failure_retry_minutes: u32,
    pub discovery: DiscoveryConfig,
    pub ipp_query_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub scheduler_tick_seconds: u64,
    pub state_path: Option<PathBuf>,
    pub spool_dir: Option<PathBuf>,
    pub mqtt: Option<MqttConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            printers: Vec::new(),
            auto_print_enabled: true,
            status_poll_interval_minutes: 15,
            failure_retry_minutes: 60,
            discovery: DiscoveryConfig::default(),
            ipp_query_timeout_seconds: 45,
            request_timeout_seconds: 120,
            scheduler_tick_seconds: 30,
            state_path: None,
            spool_dir: None,
            mqtt: None,
        }
    }
}

impl AppConfig {
    /// Build from a parsed options document. Only a non-object root is fatal;
    /// invalid printer entries are logged and skipped.
    pub fn from_options(options: &Value) -> Result<Self> {
        let options = options
            .as_object()
            .ok_or_else(|| KeepaliveError::Config("options root must be a JSON object".into()))?;

        let defaults = Self::default();
        let printers = parse_printers(options);
        if printers.is_empty() {
            warn!("no printers configured; running in discovery-only mode");
        }

        let path_opt = |key: &str| non_empty(coerce_str(options.get(key), "")).map(PathBuf::from);

        Ok(Self {
            printers,
            auto_print_enabled: coerce_bool(options.get("auto_print_enabled"), true),
            status_poll_interval_minutes: coerce_int_clamped(
                options.get("status_poll_interval_minutes"),
                i64::from(defaults.status_poll_interval_minutes),
                1,
                1440,
            ) as u32,
            failure_retry_minutes: coerce_int_clamped(
                options.get("failure_retry_minutes"),
                i64::from(defaults.failure_retry_minutes),
                1,
                1440,
            ) as u32,
            discovery: DiscoveryConfig {
                enabled: coerce_bool(options.get("discovery_enabled"), true),
                interval_minutes: coerce_int_clamped(
                    options.get("discovery_interval_minutes"),
                    180,
                    1,
                    1440,
                ) as u32,
                timeout_seconds: coerce_int_clamped(options.get("discovery_timeout_seconds"), 6, 1, 30)
                    as u32,
                ipp_query_timeout_seconds: coerce_int_clamped(
                    options.get("discovery_ipp_query_timeout_seconds"),
                    8,
                    1,
                    30,
                ) as u32,
                include_ipps: coerce_bool(options.get("discovery_include_ipps"), true),
            },
            ipp_query_timeout_seconds: coerce_int_clamped(
                options.get("ipp_query_timeout_seconds"),
                45,
                1,
                600,
            ) as u64,
            request_timeout_seconds: coerce_int_clamped(
                options.get("request_timeout_seconds"),
                120,
                1,
                3600,
            ) as u64,
            scheduler_tick_seconds: coerce_int_clamped(
                options.get("scheduler_tick_seconds"),
                30,
                1,
                3600,
            ) as u64,
            state_path: path_opt("state_path"),
            spool_dir: path_opt("spool_dir"),
            mqtt: MqttConfig::from_options(options),
        })
    }

    /// Read and validate an options file. Missing or unparseable is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KeepaliveError::Config(format!("cannot read options file {}: {e}", path.display()))
        })?;
        let options: Value = serde_json::from_str(&raw).map_err(|e| {
            KeepaliveError::Config(format!("options file {} is not valid JSON: {e}", path.display()))
        })?;
        Self::from_options(&options)
    }

    pub fn printer(&self, id: &str) -> Option<&PrinterConfig> {
        self.printers.iter().find(|p| p.id == id)
    }
}
