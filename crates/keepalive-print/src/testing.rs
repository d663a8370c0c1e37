// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process fakes for the device, renderer, discovery and publisher seams,
// plus a harness that wires a full service on a manual clock.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use keepalive_core::clock::ManualClock;
use keepalive_core::config::PrinterConfig;
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::observation::AttributeMap;
use keepalive_core::payload::PrinterPayload;
use keepalive_core::render::{PrintContext, RenderedPage, TemplateRenderer};
use keepalive_core::types::{DeviceClass, DiscoveryCandidate, DocumentFormat, PrintSource, Template};

use crate::device::{DeviceQuery, DiscoveryProvider, PrintSubmitter, StatePublisher};
use crate::executor::PrintExecutor;
use crate::poller::DevicePoller;
use crate::service::KeepaliveService;
use crate::store::StateStore;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Device query
// ---------------------------------------------------------------------------

/// Replays scripted responses in order; an empty script answers with no
/// attributes.
#[derive(Default)]
pub struct FakeDevice {
    script: Mutex<VecDeque<std::result::Result<AttributeMap, String>>>,
    queries: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_attributes(&self, pairs: &[(&str, &str)]) {
        let attrs = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        lock(&self.script).push_back(Ok(attrs));
    }

    pub fn push_impressions(&self, count: i64) {
        self.push_attributes(&[("job-impressions-completed", &count.to_string())]);
    }

    pub fn push_error(&self, message: &str) {
        lock(&self.script).push_back(Err(message.to_owned()));
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceQuery for FakeDevice {
    async fn query_attributes(&self, _uri: &str, _timeout: Duration) -> Result<AttributeMap> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).pop_front() {
            Some(Ok(attrs)) => Ok(attrs),
            Some(Err(message)) => Err(KeepaliveError::DeviceQuery(message)),
            None => Ok(AttributeMap::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Print submitter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSubmitter {
    submissions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
    failures: Mutex<VecDeque<String>>,
    jobs: Mutex<Vec<(String, String)>>,
}

impl FakeSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, message: &str) {
        lock(&self.failures).push_back(message.to_owned());
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `(uri, job name)` per submission, in order.
    pub fn jobs(&self) -> Vec<(String, String)> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl PrintSubmitter for FakeSubmitter {
    async fn submit(
        &self,
        uri: &str,
        document: &Path,
        _format: DocumentFormat,
        job_name: &str,
    ) -> Result<String> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        lock(&self.jobs).push((uri.to_owned(), job_name.to_owned()));

        let exists = document.exists();
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !exists {
            return Err(KeepaliveError::PrintSubmission("spool file missing".into()));
        }
        match lock(&self.failures).pop_front() {
            Some(message) => Err(KeepaliveError::PrintSubmission(message)),
            None => Ok("Print-Job accepted".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRenderer {
    rendered: Mutex<Vec<(String, Template, PrintSource)>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(printer id, template, requesting source)` per render, in order.
    pub fn rendered(&self) -> Vec<(String, Template, PrintSource)> {
        lock(&self.rendered).clone()
    }
}

impl TemplateRenderer for FakeRenderer {
    fn render(&self, printer: &PrinterConfig, template: Template, context: &PrintContext) -> Result<RenderedPage> {
        lock(&self.rendered).push((printer.id.clone(), template, context.source));
        Ok(RenderedPage {
            bytes: format!("%PDF-1.7\n% {}\n", context.reason).into_bytes(),
            format: DocumentFormat::Pdf,
        })
    }
}

// ---------------------------------------------------------------------------
// Discovery and publisher
// ---------------------------------------------------------------------------

pub fn candidate(uri: &str) -> DiscoveryCandidate {
    DiscoveryCandidate {
        service_name: format!("Test Printer._ipp._tcp.local. ({uri})"),
        uri: uri.to_owned(),
        host: String::new(),
        port: 631,
        secure: false,
        reachable: true,
        error: None,
        printer_name: "Test Printer".into(),
        make_and_model: "EPSON ET-2850 Series".into(),
        device_class_guess: DeviceClass::Inkjet,
        already_configured: false,
    }
}

#[derive(Default)]
pub struct FakeDiscovery {
    candidates: Vec<DiscoveryCandidate>,
    scans: AtomicUsize,
}

impl FakeDiscovery {
    pub fn with_candidates(candidates: Vec<DiscoveryCandidate>) -> Self {
        Self {
            candidates,
            scans: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryProvider for FakeDiscovery {
    async fn scan(&self, _configured: &[PrinterConfig]) -> Result<Vec<DiscoveryCandidate>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }
}

pub struct FakePublisher {
    connected: AtomicBool,
    published: Mutex<Vec<PrinterPayload>>,
}

impl FakePublisher {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn published_ids(&self) -> Vec<String> {
        lock(&self.published)
            .iter()
            .map(|p| p.printer_id.clone())
            .collect()
    }
}

#[async_trait]
impl StatePublisher for FakePublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_state(&self, payload: &PrinterPayload) -> Result<()> {
        lock(&self.published).push(payload.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A fully wired service on fakes, starting at 2026-01-05 09:00 UTC.
pub struct Harness {
    pub printers: Vec<PrinterConfig>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<StateStore>,
    pub device: Arc<FakeDevice>,
    pub submitter: Arc<FakeSubmitter>,
    pub renderer: Arc<FakeRenderer>,
    pub executor: Arc<PrintExecutor>,
    pub service: Arc<KeepaliveService>,
    spool: TempDir,
}

pub struct HarnessBuilder {
    printers: Vec<PrinterConfig>,
    request_timeout: Duration,
    auto_print: bool,
    failure_retry_minutes: u32,
}

impl HarnessBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn auto_print(mut self, enabled: bool) -> Self {
        self.auto_print = enabled;
        self
    }

    pub fn failure_retry_minutes(mut self, minutes: u32) -> Self {
        self.failure_retry_minutes = minutes;
        self
    }

    pub fn build(self) -> Harness {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(StateStore::in_memory());
        let device = Arc::new(FakeDevice::new());
        let submitter = Arc::new(FakeSubmitter::new());
        let renderer = Arc::new(FakeRenderer::new());
        let spool = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("cannot create spool dir for harness: {e}"),
        };

        let executor = Arc::new(PrintExecutor::new(
            Arc::clone(&store),
            clock.clone(),
            renderer.clone(),
            submitter.clone(),
            spool.path().to_path_buf(),
            self.request_timeout,
            self.failure_retry_minutes,
        ));
        let poller = DevicePoller::new(
            device.clone(),
            Arc::clone(&store),
            clock.clone(),
            chrono::Duration::minutes(15),
            Duration::from_secs(5),
        );
        let service = match KeepaliveService::new(
            self.printers.clone(),
            Arc::clone(&store),
            poller,
            Arc::clone(&executor),
            clock.clone(),
            self.auto_print,
        ) {
            Ok(service) => Arc::new(service),
            Err(e) => panic!("harness service failed to start: {e}"),
        };

        Harness {
            printers: self.printers,
            clock,
            store,
            device,
            submitter,
            renderer,
            executor,
            service,
            spool,
        }
    }
}

impl Harness {
    pub fn builder(printers: Vec<PrinterConfig>) -> HarnessBuilder {
        HarnessBuilder {
            printers,
            request_timeout: Duration::from_secs(10),
            auto_print: true,
            failure_retry_minutes: 60,
        }
    }

    pub fn new(printers: Vec<PrinterConfig>) -> Self {
        Self::builder(printers).build()
    }

    pub fn with_request_timeout(printers: Vec<PrinterConfig>, timeout: Duration) -> Self {
        Self::builder(printers).request_timeout(timeout).build()
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool.path().to_path_buf()
    }
}
