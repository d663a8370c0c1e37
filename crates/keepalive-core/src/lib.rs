// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer Keepalive: core types, configuration and the decision engine shared
// across all crates.

pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod observation;
pub mod payload;
pub mod render;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, MqttConfig, PrinterConfig};
pub use decision::{EffectiveSettings, Health, HealthStatus, KeepaliveDecision};
pub use error::{KeepaliveError, Result};
pub use observation::{AttributeMap, DeviceObservation};
pub use payload::PrinterPayload;
pub use render::{PrintContext, RenderedPage, TemplateRenderer};
pub use types::*;
