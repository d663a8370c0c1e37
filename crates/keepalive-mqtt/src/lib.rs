// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keepalive MQTT: Home Assistant discovery, state publishing and the command
// bridge that feeds hub requests back into the keepalive service.

pub mod bridge;
pub mod discovery;
pub mod topics;

pub use bridge::{Completion, ConnectionState, MqttBridge, MqttHandle, MqttSink};
pub use discovery::{DiscoveryMessage, discovery_messages};
pub use topics::{Command, Inbound, Topics};
