// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Topic scheme and inbound message classification.
//
//   <prefix>/status                 availability, retained online/offline
//   <prefix>/<id>/state             JSON state snapshot
//   <prefix>/<id>/set/<field>       commands from the hub
//   <discovery_prefix>/status       hub birth/death messages

use std::str::FromStr;

use keepalive_core::config::{MqttConfig, parse_flag};
use keepalive_core::types::{Template, clamp_cadence};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(topic_prefix: &str, discovery_prefix: &str) -> Self {
        Self {
            prefix: topic_prefix.trim_end_matches('/').to_owned(),
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_owned(),
        }
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(&config.topic_prefix, &config.discovery_prefix)
    }

    pub fn availability(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn state(&self, printer_id: &str) -> String {
        format!("{}/{printer_id}/state", self.prefix)
    }

    pub fn command(&self, printer_id: &str, field: &str) -> String {
        format!("{}/{printer_id}/set/{field}", self.prefix)
    }

    /// Wildcard subscription covering every command topic.
    pub fn command_filter(&self) -> String {
        format!("{}/+/set/#", self.prefix)
    }

    pub fn hub_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn discovery_config(&self, component: &str, object_id: &str) -> String {
        format!("{}/{component}/{object_id}/config", self.discovery_prefix)
    }

    /// Sort an incoming message. Anything unrecognised or malformed is
    /// `Inbound::Ignored`.
    pub fn classify(&self, topic: &str, payload: &str) -> Inbound {
        if topic == self.hub_status() {
            return if payload.trim().eq_ignore_ascii_case("online") {
                Inbound::HubOnline
            } else {
                Inbound::Ignored
            };
        }

        let Some(tail) = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|t| t.strip_prefix('/'))
        else {
            return Inbound::Ignored;
        };

        let parts: Vec<&str> = tail.split('/').collect();
        let [printer_id, "set", field] = parts.as_slice() else {
            return Inbound::Ignored;
        };
        if printer_id.is_empty() {
            return Inbound::Ignored;
        }

        match Command::parse(field, payload) {
            Some(command) => Inbound::Command {
                printer_id: (*printer_id).to_owned(),
                command,
            },
            None => Inbound::Ignored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The hub restarted; discovery and states must be republished.
    HubOnline,
    Command { printer_id: String, command: Command },
    Ignored,
}

/// A settings change or action requested by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Template(Template),
    /// Already clamped to the supported range.
    CadenceHours(u32),
    Enabled(bool),
    PrintNow,
}

impl Command {
    /// `None` for unknown fields and for payloads that do not parse.
    pub fn parse(field: &str, payload: &str) -> Option<Self> {
        let value = payload.trim();
        match field {
            "template" => Template::from_str(value).ok().map(Self::Template),
            "cadence_hours" => parse_hours(value).map(|h| Self::CadenceHours(clamp_cadence(h))),
            "enabled" => Some(Self::Enabled(parse_flag(value))),
            "print_now" => Some(Self::PrintNow),
            _ => None,
        }
    }
}

/// Whole hours; number entities may send `24.0`.
fn parse_hours(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}
