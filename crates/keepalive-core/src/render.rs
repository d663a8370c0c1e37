// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rendering seam between the print executor and page generation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PrinterConfig;
use crate::decision::{KeepaliveDecision, describe_print_reason};
use crate::error::Result;
use crate::payload::iso_utc;
use crate::types::{DocumentFormat, PrintSource, Template};

/// Why and when a page is being printed. Shown in the page's context block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintContext {
    pub source: PrintSource,
    pub trigger: String,
    pub reason: String,
    pub cadence_hours: u32,
    pub printed_at: String,
    pub last_print_at: String,
    pub next_due_at: String,
}

impl PrintContext {
    pub fn new(
        source: PrintSource,
        only_if_needed: bool,
        decision: &KeepaliveDecision,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            trigger: source.trigger_label().to_owned(),
            reason: describe_print_reason(source, only_if_needed, decision, now),
            cadence_hours: decision.settings.cadence_hours,
            printed_at: iso_utc(Some(now)),
            last_print_at: iso_utc(decision.last_print_at),
            next_due_at: iso_utc(decision.due_at),
        }
    }

    /// Display lines in page order; empty fields are omitted.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Trigger: {}", self.trigger),
            format!("Source: {}", self.source),
            format!("Cadence: {}h", self.cadence_hours),
        ];
        if !self.reason.is_empty() {
            lines.push(format!("Reason: {}", self.reason));
        }
        if !self.last_print_at.is_empty() {
            lines.push(format!("Last print seen: {}", self.last_print_at));
        }
        if !self.next_due_at.is_empty() {
            lines.push(format!("Next due at: {}", self.next_due_at));
        }
        lines
    }
}

/// A finished maintenance page ready for submission.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
}

/// Produces maintenance pages. Implementations are synchronous and may be
/// CPU-heavy; callers run them off the async executor.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        printer: &PrinterConfig,
        template: Template,
        context: &PrintContext,
    ) -> Result<RenderedPage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::evaluate;
    use crate::types::{DeviceClass, PrinterState};
    use chrono::{Duration, TimeZone};

    #[test]
    fn context_lines_skip_empty_fields() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let config = PrinterConfig::new("p", "ipp://p/ipp/print", DeviceClass::Inkjet);

        let no_history = evaluate(&config, &PrinterState::default(), t0);
        let ctx = PrintContext::new(PrintSource::Api, false, &no_history, t0);
        let lines = ctx.lines();
        assert_eq!(lines[0], "Trigger: API request");
        assert!(lines.iter().all(|l| !l.starts_with("Next due at")));

        let state = PrinterState::new(t0);
        let now = t0 + Duration::hours(200);
        let decision = evaluate(&config, &state, now);
        let ctx = PrintContext::new(PrintSource::Scheduler, true, &decision, now);
        assert_eq!(ctx.trigger, "Automatic scheduler");
        assert!(ctx.lines().iter().any(|l| l == "Next due at: 2026-02-08T00:00:00Z"));
    }
}
