// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator seams for everything that talks to a device, the network, or
// the hub, plus the IPP-backed implementation of the device traits.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use keepalive_core::config::PrinterConfig;
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::observation::AttributeMap;
use keepalive_core::payload::PrinterPayload;
use keepalive_core::types::{DiscoveryCandidate, DocumentFormat};

use crate::ipp_client::IppClient;

/// Status query against a printer.
#[async_trait]
pub trait DeviceQuery: Send + Sync {
    /// Fetch the printer's attribute map, giving up after `timeout`.
    async fn query_attributes(&self, uri: &str, timeout: Duration) -> Result<AttributeMap>;
}

/// Physical job submission. Callers bound the call with their own timeout.
#[async_trait]
pub trait PrintSubmitter: Send + Sync {
    /// Returns human-readable details (e.g. the job-id) on success.
    async fn submit(
        &self,
        uri: &str,
        document: &Path,
        format: DocumentFormat,
        job_name: &str,
    ) -> Result<String>;
}

/// Network scan yielding printer candidates.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    async fn scan(&self, configured: &[PrinterConfig]) -> Result<Vec<DiscoveryCandidate>>;
}

/// Sink for per-printer state snapshots (the hub bridge).
#[async_trait]
pub trait StatePublisher: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn publish_state(&self, payload: &PrinterPayload) -> Result<()>;
}

/// Device Query and Print Submitter over IPP.
#[derive(Debug, Default, Clone, Copy)]
pub struct IppDevice;

#[async_trait]
impl DeviceQuery for IppDevice {
    async fn query_attributes(&self, uri: &str, timeout: Duration) -> Result<AttributeMap> {
        let client = IppClient::new(uri)?;
        match tokio::time::timeout(timeout, client.get_printer_attributes()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(uri, seconds = timeout.as_secs(), "Get-Printer-Attributes timed out");
                Err(KeepaliveError::Timeout {
                    operation: "Get-Printer-Attributes",
                    seconds: timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl PrintSubmitter for IppDevice {
    async fn submit(
        &self,
        uri: &str,
        document: &Path,
        format: DocumentFormat,
        job_name: &str,
    ) -> Result<String> {
        let bytes = tokio::fs::read(document).await?;
        debug!(uri, bytes = bytes.len(), path = %document.display(), "submitting document");

        let client = IppClient::new(uri)
            .map_err(|e| KeepaliveError::PrintSubmission(e.to_string()))?;
        let job_id = client.print_job(bytes, format, job_name).await?;
        Ok(match job_id {
            Some(id) => format!("Print-Job accepted (job-id {id})"),
            None => "Print-Job accepted".to_owned(),
        })
    }
}
