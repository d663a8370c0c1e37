// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Home Assistant MQTT discovery metadata.
//
// Built only from the immutable printer configuration so republishing yields
// byte-identical retained messages.

use serde_json::{Map, Value, json};

use keepalive_core::config::{APP_NAME, PrinterConfig};
use keepalive_core::types::{MAX_CADENCE_HOURS, MIN_CADENCE_HOURS, Template};

use crate::topics::Topics;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One retained discovery message.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: Value,
}

/// Fields shared by every entity of one printer.
fn base(printer: &PrinterConfig, topics: &Topics) -> Map<String, Value> {
    let fields = json!({
        "device": {
            "identifiers": [format!("printer_keepalive_{}", printer.id)],
            "name": printer.name,
            "manufacturer": "Printer",
            "model": format!("{} printer", printer.device_class),
            "sw_version": APP_VERSION,
        },
        "origin": {
            "name": APP_NAME,
            "sw_version": APP_VERSION,
        },
        "availability_topic": topics.availability(),
        "payload_available": "online",
        "payload_not_available": "offline",
    });
    match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

struct Entity {
    component: &'static str,
    key: &'static str,
    name: &'static str,
    icon: &'static str,
    extra: Value,
}

fn entity(component: &'static str, key: &'static str, name: &'static str, icon: &'static str, extra: Value) -> Entity {
    Entity {
        component,
        key,
        name,
        icon,
        extra,
    }
}

fn entities(printer: &PrinterConfig, topics: &Topics) -> Vec<Entity> {
    let state = topics.state(&printer.id);
    let sensor = |key, name, icon, template: &str| {
        entity(
            "sensor",
            key,
            name,
            icon,
            json!({ "state_topic": state, "value_template": template }),
        )
    };

    let mut list = vec![
        entity(
            "sensor",
            "health",
            "Health",
            "mdi:heart-pulse",
            json!({
                "state_topic": state,
                "value_template": "{{ value_json.health_status }}",
                "json_attributes_topic": state,
            }),
        ),
        sensor("printer_state", "Printer State", "mdi:printer", "{{ value_json.printer_state }}"),
        entity(
            "sensor",
            "time_since_last_print",
            "Time Since Last Print",
            "mdi:timer-outline",
            json!({
                "state_topic": state,
                "value_template": "{{ value_json.time_since_last_print_hours | default(0) }}",
                "unit_of_measurement": "h",
            }),
        ),
        sensor(
            "keepalive_print_count",
            "Keepalive Print Count",
            "mdi:counter",
            "{{ value_json.keepalive_print_count | int(0) }}",
        ),
        sensor(
            "last_keepalive_result",
            "Last Keepalive Result",
            "mdi:check-decagram",
            "{{ value_json.last_keepalive_result }}",
        ),
        sensor(
            "next_keepalive_due",
            "Next Keepalive Due",
            "mdi:calendar-clock",
            "{{ value_json.next_keepalive_due_at }}",
        ),
        sensor(
            "queued_job_count",
            "Queued Job Count",
            "mdi:format-list-numbered",
            "{{ value_json.queued_job_count | default(0) }}",
        ),
        sensor(
            "job_impressions_completed",
            "Job Impressions Completed",
            "mdi:file-document-multiple",
            "{{ value_json.job_impressions_completed | default(0) }}",
        ),
        sensor(
            "media_sheets_completed",
            "Media Sheets Completed",
            "mdi:file-multiple",
            "{{ value_json.media_sheets_completed | default(0) }}",
        ),
    ];

    list.push(entity(
        "sensor",
        "printer_up_time",
        "Printer Uptime",
        "mdi:timer",
        json!({
            "state_topic": state,
            "value_template": "{{ value_json.printer_up_time_seconds | default(0) }}",
            "unit_of_measurement": "s",
        }),
    ));
    list.push(entity(
        "sensor",
        "lowest_marker_level",
        "Lowest Supply Level",
        "mdi:water-percent",
        json!({
            "state_topic": state,
            "value_template": "{{ value_json.lowest_marker_level | default(0) }}",
            "unit_of_measurement": "%",
        }),
    ));
    list.push(entity(
        "binary_sensor",
        "keepalive_needed",
        "Keepalive Needed",
        "mdi:alert-circle-outline",
        json!({
            "state_topic": state,
            "value_template": "{{ 'ON' if value_json.keepalive_needed else 'OFF' }}",
            "payload_on": "ON",
            "payload_off": "OFF",
        }),
    ));

    // -- Controls --
    list.push(entity(
        "switch",
        "keepalive_enabled",
        "Keepalive Enabled",
        "mdi:toggle-switch",
        json!({
            "state_topic": state,
            "value_template": "{{ 'ON' if value_json.enabled else 'OFF' }}",
            "command_topic": topics.command(&printer.id, "enabled"),
            "payload_on": "ON",
            "payload_off": "OFF",
            "state_on": "ON",
            "state_off": "OFF",
        }),
    ));
    list.push(entity(
        "select",
        "template",
        "Template",
        "mdi:file-document-outline",
        json!({
            "state_topic": state,
            "value_template": "{{ value_json.template }}",
            "command_topic": topics.command(&printer.id, "template"),
            "options": Template::keywords(),
        }),
    ));
    list.push(entity(
        "number",
        "cadence_hours",
        "Cadence Hours",
        "mdi:clock-time-four-outline",
        json!({
            "state_topic": state,
            "value_template": "{{ value_json.cadence_hours | int(0) }}",
            "command_topic": topics.command(&printer.id, "cadence_hours"),
            "min": MIN_CADENCE_HOURS,
            "max": MAX_CADENCE_HOURS,
            "step": 1,
            "mode": "box",
            "unit_of_measurement": "h",
        }),
    ));
    list.push(entity(
        "button",
        "print_now",
        "Print Now",
        "mdi:printer-pos",
        json!({
            "command_topic": topics.command(&printer.id, "print_now"),
            "payload_press": "PRESS",
        }),
    ));

    list
}

/// Every discovery message for one printer, in publish order.
pub fn discovery_messages(printer: &PrinterConfig, topics: &Topics) -> Vec<DiscoveryMessage> {
    let object_prefix = format!("printer_keepalive_{}", printer.id);
    let shared = base(printer, topics);

    entities(printer, topics)
        .into_iter()
        .map(|e| {
            let unique_id = format!("{object_prefix}_{}", e.key);
            let mut payload = shared.clone();
            payload.insert("name".into(), Value::from(e.name));
            payload.insert("object_id".into(), Value::from(format!("{}_{}", printer.id, e.key)));
            payload.insert("unique_id".into(), Value::from(unique_id.clone()));
            payload.insert("icon".into(), Value::from(e.icon));
            if let Value::Object(extra) = e.extra {
                payload.extend(extra);
            }
            DiscoveryMessage {
                topic: topics.discovery_config(e.component, &unique_id),
                payload: Value::Object(payload),
            }
        })
        .collect()
}
