// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hub entity snapshots used to fill template-specific page sections.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Domains preferred, in order, when a printer has no tracked entity ids.
const DEFAULT_DOMAIN_ORDER: &[&str] = &[
    "person",
    "weather",
    "alarm_control_panel",
    "climate",
    "switch",
    "light",
    "binary_sensor",
    "sensor",
];

/// One entity as reported by the hub's state API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntitySnapshot {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or_default()
    }

    /// Attribute rendered for display, `n/a` when absent.
    pub fn attribute_text(&self, key: &str) -> String {
        match self.attributes.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "n/a".to_owned(),
            Some(other) => other.to_string(),
        }
    }

    /// `Friendly Name: state unit`
    pub fn display_line(&self) -> String {
        let name = self
            .attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.entity_id);
        match self
            .attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
        {
            Some(unit) => format!("{name}: {} {unit}", self.state),
            None => format!("{name}: {}", self.state),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unknown" | "unavailable")
    }
}

/// Read-only view of the hub's entities. Not required by the keepalive core;
/// pages degrade to placeholder text when it returns nothing.
pub trait EntitySource: Send + Sync {
    fn entities(&self) -> Vec<EntitySnapshot>;
}

/// A source with no entities.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntities;

impl EntitySource for NoEntities {
    fn entities(&self) -> Vec<EntitySnapshot> {
        Vec::new()
    }
}

/// In-memory snapshot that can be refreshed by whatever feeds it.
#[derive(Debug, Default)]
pub struct StaticEntities {
    snapshot: RwLock<Vec<EntitySnapshot>>,
}

impl StaticEntities {
    pub fn new(entities: Vec<EntitySnapshot>) -> Self {
        Self {
            snapshot: RwLock::new(entities),
        }
    }

    pub fn replace(&self, entities: Vec<EntitySnapshot>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = entities;
    }
}

impl EntitySource for StaticEntities {
    fn entities(&self) -> Vec<EntitySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Tracked ids if configured, otherwise a domain-ordered sample of the hub.
pub fn select_entity_ids(tracked: &[String], all: &[EntitySnapshot], limit: usize) -> Vec<String> {
    if !tracked.is_empty() {
        return tracked.iter().take(limit).cloned().collect();
    }
    let mut selected: Vec<String> = Vec::new();
    for domain in DEFAULT_DOMAIN_ORDER {
        for entity in all.iter().filter(|e| e.domain() == *domain) {
            if selected.len() == limit {
                return selected;
            }
            if !selected.contains(&entity.entity_id) {
                selected.push(entity.entity_id.clone());
            }
        }
    }
    selected
}

/// Configured weather entity, else the first `weather.*` the hub reports.
pub fn detect_weather_entity(configured: Option<&str>, all: &[EntitySnapshot]) -> Option<String> {
    if let Some(id) = configured.filter(|s| !s.is_empty()) {
        return Some(id.to_owned());
    }
    all.iter()
        .find(|e| e.domain() == "weather")
        .map(|e| e.entity_id.clone())
}
