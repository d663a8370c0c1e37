// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print executor: the skip checks and the serialized render-and-submit path.
//
// One print lock is shared by every printer, so at most one physical
// submission is in flight across the whole process.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use keepalive_core::clock::Clock;
use keepalive_core::config::PrinterConfig;
use keepalive_core::decision::{effective_settings, evaluate};
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::render::{PrintContext, TemplateRenderer};
use keepalive_core::types::{DeviceState, KeepaliveResult, PrintSource, PrinterState, Template};

use crate::device::PrintSubmitter;
use crate::store::StateStore;

/// Why a keepalive request did not reach the printer. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NotDue { next_due_at: Option<DateTime<Utc>> },
    Disabled,
    Busy,
    Cooldown { minutes: u32 },
}

impl SkipReason {
    pub fn message(&self) -> String {
        match self {
            Self::NotDue { .. } => "Keepalive not due based on print history.".into(),
            Self::Disabled => "Printer keepalive is disabled for this printer.".into(),
            Self::Busy => "Printer is currently processing another job.".into(),
            Self::Cooldown { minutes } => {
                format!("Previous failure cooldown active ({minutes} minutes).")
            }
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Record of one submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintReport {
    pub attempt_id: Uuid,
    pub printer_id: String,
    pub source: PrintSource,
    pub template: Template,
    pub trigger: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Submitter details on success, the error text on failure.
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum KeepaliveOutcome {
    Skipped { reason: SkipReason },
    Printed(PrintReport),
    Failed(PrintReport),
}

impl KeepaliveOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_printed(&self) -> bool {
        matches!(self, Self::Printed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What the pre-checks hand to the execution phase.
struct PrintPlan {
    template: Template,
    context: PrintContext,
}

pub struct PrintExecutor {
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn TemplateRenderer>,
    submitter: Arc<dyn PrintSubmitter>,
    print_lock: Arc<Mutex<()>>,
    spool_dir: PathBuf,
    request_timeout: Duration,
    failure_retry_minutes: u32,
}

impl PrintExecutor {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn TemplateRenderer>,
        submitter: Arc<dyn PrintSubmitter>,
        spool_dir: PathBuf,
        request_timeout: Duration,
        failure_retry_minutes: u32,
    ) -> Self {
        Self {
            store,
            clock,
            renderer,
            submitter,
            print_lock: Arc::new(Mutex::new(())),
            spool_dir,
            request_timeout,
            failure_retry_minutes,
        }
    }

    /// Shared handle to the process-wide print lock.
    pub fn print_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.print_lock)
    }

    /// Print a maintenance page unless a skip check applies.
    ///
    /// Checks run in order: not due (only when `only_if_needed`), disabled
    /// (always), busy and cooldown (only when `only_if_needed`). They run once
    /// up front and again once the print lock is held, so a request that
    /// waited behind another print sees the state that print left behind.
    #[instrument(skip(self, printer), fields(printer = %printer.id, source = %source))]
    pub async fn run_keepalive(
        &self,
        printer: &PrinterConfig,
        template_override: Option<Template>,
        source: PrintSource,
        only_if_needed: bool,
    ) -> Result<KeepaliveOutcome> {
        if let Err(reason) = self.plan(printer, template_override, source, only_if_needed)? {
            debug!(reason = %reason, "keepalive skipped");
            return Ok(KeepaliveOutcome::Skipped { reason });
        }

        let _guard = self.print_lock.lock().await;

        let plan = match self.plan(printer, template_override, source, only_if_needed)? {
            Ok(plan) => plan,
            Err(reason) => {
                debug!(reason = %reason, "keepalive skipped after waiting for print lock");
                return Ok(KeepaliveOutcome::Skipped { reason });
            }
        };

        let attempt_id = Uuid::new_v4();
        let started_at = self.clock.now();
        info!(%attempt_id, template = %plan.template, "submitting keepalive page");

        let result = self.render_and_submit(printer, &plan).await;
        let finished_at = self.clock.now();

        let details = match &result {
            Ok(details) => details.clone(),
            Err(e) => e.to_string(),
        };
        self.store.update(&printer.id, started_at, |state| match &result {
            Ok(_) => state.record_keepalive_success(started_at),
            Err(_) => state.record_keepalive_failure(started_at, &details),
        })?;

        let report = PrintReport {
            attempt_id,
            printer_id: printer.id.clone(),
            source,
            template: plan.template,
            trigger: plan.context.trigger.clone(),
            reason: plan.context.reason.clone(),
            started_at,
            finished_at,
            details,
        };

        Ok(match result {
            Ok(_) => {
                info!(%attempt_id, template = %plan.template, "keepalive print submitted");
                KeepaliveOutcome::Printed(report)
            }
            Err(e) => {
                error!(%attempt_id, error = %e, "keepalive print failed");
                KeepaliveOutcome::Failed(report)
            }
        })
    }

    /// The pre-checks, evaluated inside one store critical section.
    fn plan(
        &self,
        printer: &PrinterConfig,
        template_override: Option<Template>,
        source: PrintSource,
        only_if_needed: bool,
    ) -> Result<std::result::Result<PrintPlan, SkipReason>> {
        let now = self.clock.now();
        let cooldown = chrono::Duration::minutes(i64::from(self.failure_retry_minutes));
        let minutes = self.failure_retry_minutes;

        self.store.read(&printer.id, now, |state| {
            let decision = evaluate(printer, state, now);
            if only_if_needed && !decision.needed {
                return Err(SkipReason::NotDue {
                    next_due_at: decision.due_at,
                });
            }
            if !effective_settings(printer, state).enabled {
                return Err(SkipReason::Disabled);
            }
            if only_if_needed && state.printer_state == DeviceState::Processing {
                return Err(SkipReason::Busy);
            }
            if only_if_needed && in_cooldown(state, now, cooldown) {
                return Err(SkipReason::Cooldown { minutes });
            }

            Ok(PrintPlan {
                template: template_override.unwrap_or(decision.settings.template),
                context: PrintContext::new(source, only_if_needed, &decision, now),
            })
        })
    }

    async fn render_and_submit(&self, printer: &PrinterConfig, plan: &PrintPlan) -> Result<String> {
        let renderer = Arc::clone(&self.renderer);
        let config = printer.clone();
        let template = plan.template;
        let context = plan.context.clone();
        let page = tokio::task::spawn_blocking(move || renderer.render(&config, template, &context))
            .await
            .map_err(|e| KeepaliveError::Render(format!("render task aborted: {e}")))??;

        tokio::fs::create_dir_all(&self.spool_dir).await?;
        // Removed on drop, whichever way this function returns.
        let mut spool = tempfile::Builder::new()
            .prefix("keepalive-")
            .suffix(&format!(".{}", page.format.extension()))
            .tempfile_in(&self.spool_dir)?;
        spool.write_all(&page.bytes)?;
        spool.flush()?;
        debug!(path = %spool.path().display(), bytes = page.bytes.len(), "page spooled");

        let job_name = format!("Printer Keepalive - {}", printer.name);
        let submit = self
            .submitter
            .submit(&printer.uri, spool.path(), page.format, &job_name);
        match tokio::time::timeout(self.request_timeout, submit).await {
            Ok(result) => result,
            Err(_) => Err(KeepaliveError::Timeout {
                operation: "Print-Job",
                seconds: self.request_timeout.as_secs(),
            }),
        }
    }
}

fn in_cooldown(state: &PrinterState, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    state.last_keepalive_result == KeepaliveResult::Failed
        && state
            .last_keepalive_attempt_at
            .is_some_and(|at| now - at < window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::Duration as ChronoDuration;
    use keepalive_core::types::DeviceClass;

    #[tokio::test]
    async fn not_due_is_skipped_with_next_due_time() {
        let h = Harness::new(vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet)]);
        let t0 = h.clock.now();
        h.store.ensure(["p1"], t0).unwrap();
        h.clock.advance(ChronoDuration::hours(2));

        let outcome = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Scheduler, true)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            KeepaliveOutcome::Skipped {
                reason: SkipReason::NotDue {
                    next_due_at: Some(t0 + ChronoDuration::hours(168))
                }
            }
        );
        assert_eq!(h.submitter.submissions(), 0);
    }

    #[tokio::test]
    async fn disabled_is_skipped_even_when_forced() {
        let printer = PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet).with_enabled(false);
        let h = Harness::new(vec![printer]);

        let outcome = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Api, false)
            .await
            .unwrap();
        assert_eq!(outcome, KeepaliveOutcome::Skipped { reason: SkipReason::Disabled });
    }

    #[tokio::test]
    async fn busy_printer_only_blocks_automatic_prints() {
        let h = Harness::new(vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet).with_cadence(1)]);
        let t0 = h.clock.now();
        h.store
            .update("p1", t0, |s| s.printer_state = DeviceState::Processing)
            .unwrap();
        h.clock.advance(ChronoDuration::hours(2));

        let auto = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Scheduler, true)
            .await
            .unwrap();
        assert_eq!(auto, KeepaliveOutcome::Skipped { reason: SkipReason::Busy });

        let forced = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Mqtt, false)
            .await
            .unwrap();
        assert!(forced.is_printed());
    }

    #[tokio::test]
    async fn cooldown_blocks_automatic_retry_but_not_forced() {
        let h = Harness::new(vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet).with_cadence(1)]);
        h.submitter.fail_next("printer unreachable");

        let failed = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Mqtt, false)
            .await
            .unwrap();
        assert!(failed.is_failed());
        let state = h.store.snapshot("p1").unwrap();
        assert_eq!(state.last_keepalive_result, KeepaliveResult::Failed);
        assert!(state.last_keepalive_error.as_deref().unwrap().contains("unreachable"));

        // Past the 1h cadence but inside the 60 minute cooldown of the failure.
        h.clock.advance(ChronoDuration::minutes(90));
        h.store
            .update("p1", h.clock.now(), |s| {
                s.last_keepalive_attempt_at = Some(h.clock.now() - ChronoDuration::minutes(30))
            })
            .unwrap();

        let auto = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Scheduler, true)
            .await
            .unwrap();
        match auto {
            KeepaliveOutcome::Skipped { reason } => assert!(reason.message().contains("cooldown")),
            other => panic!("expected cooldown skip, got {other:?}"),
        }

        let forced = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Mqtt, false)
            .await
            .unwrap();
        assert!(forced.is_printed());
    }

    #[tokio::test]
    async fn success_updates_counters_and_clears_errors() {
        let h = Harness::new(vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Laser)]);
        let now = h.clock.now();
        h.store
            .update("p1", now, |s| s.last_error = Some("stale".into()))
            .unwrap();

        let outcome = h
            .executor
            .run_keepalive(&h.printers[0], Some(Template::ColorBars), PrintSource::Api, false)
            .await
            .unwrap();

        let KeepaliveOutcome::Printed(report) = outcome else {
            panic!("expected a print");
        };
        assert_eq!(report.template, Template::ColorBars);
        assert_eq!(report.reason, "Manual keepalive requested from API with force enabled.");

        let state = h.store.snapshot("p1").unwrap();
        assert_eq!(state.keepalive_print_count, 1);
        assert_eq!(state.last_keepalive_at, Some(now));
        assert_eq!(state.last_keepalive_attempt_at, Some(now));
        assert!(state.last_error.is_none());
        assert_eq!(
            h.renderer.rendered(),
            vec![("p1".to_owned(), Template::ColorBars, PrintSource::Api)]
        );
    }

    #[tokio::test]
    async fn spool_file_is_removed_on_success_and_failure() {
        let h = Harness::new(vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet)]);
        h.executor
            .run_keepalive(&h.printers[0], None, PrintSource::Api, false)
            .await
            .unwrap();
        h.submitter.fail_next("jammed");
        h.executor
            .run_keepalive(&h.printers[0], None, PrintSource::Api, false)
            .await
            .unwrap();

        let leftovers = std::fs::read_dir(h.spool_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(h.submitter.submissions(), 2);
    }

    #[tokio::test]
    async fn slow_submission_times_out_as_failure() {
        let h = Harness::with_request_timeout(
            vec![PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet)],
            std::time::Duration::from_millis(50),
        );
        h.submitter.set_delay(std::time::Duration::from_secs(5));

        let outcome = h
            .executor
            .run_keepalive(&h.printers[0], None, PrintSource::Api, false)
            .await
            .unwrap();
        let KeepaliveOutcome::Failed(report) = outcome else {
            panic!("expected failure");
        };
        assert!(report.details.contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submissions_never_overlap_across_printers() {
        let h = Arc::new(Harness::new(vec![
            PrinterConfig::new("p1", "ipp://a/ipp/print", DeviceClass::Inkjet),
            PrinterConfig::new("p2", "ipp://b/ipp/print", DeviceClass::Laser),
        ]));
        h.submitter.set_delay(std::time::Duration::from_millis(100));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let h = Arc::clone(&h);
            tasks.push(tokio::spawn(async move {
                let printer = h.printers[i % 2].clone();
                h.executor
                    .run_keepalive(&printer, None, PrintSource::Api, false)
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_printed());
        }

        assert_eq!(h.submitter.submissions(), 4);
        assert_eq!(h.submitter.max_in_flight(), 1);
    }
}
