// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for communicating with network printers.
//
// Uses the `ipp` crate's async API to send the two operations keepalive needs:
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5)
//   - Print-Job               (RFC 8011 §4.2.1)

use std::collections::HashMap;
use std::io::Cursor;

use ipp::prelude::*;
use tracing::{debug, error, info, instrument};

use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::observation::AttributeMap;
use keepalive_core::types::DocumentFormat;

/// Async IPP client bound to a single printer URI.
pub struct IppClient {
    uri: Uri,
}

impl IppClient {
    /// The URI should be an `ipp://` or `ipps://` address.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| KeepaliveError::DeviceQuery(format!("invalid URI '{uri}': {e}")))?;
        Ok(Self { uri: parsed })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Query the printer's status attributes as a flat name-to-string map.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub async fn get_printer_attributes(&self) -> Result<AttributeMap> {
        let operation = IppOperationBuilder::get_printer_attributes(self.uri.clone()).build();
        let client = AsyncIppClient::new(self.uri.clone());

        debug!("sending Get-Printer-Attributes");
        let response = client
            .send(operation)
            .await
            .map_err(|e| KeepaliveError::DeviceQuery(format!("Get-Printer-Attributes: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "Get-Printer-Attributes failed");
            return Err(KeepaliveError::DeviceQuery(format!(
                "Get-Printer-Attributes returned status {code:?}"
            )));
        }

        let attrs = flatten_printer_attributes(response.attributes());
        debug!(count = attrs.len(), "received printer attributes");
        Ok(attrs)
    }

    /// Submit a document as a Print-Job. Returns the printer-assigned job-id
    /// when the response carries one.
    #[instrument(skip(self, document_bytes), fields(uri = %self.uri, job_name = %job_name))]
    pub async fn print_job(
        &self,
        document_bytes: Vec<u8>,
        format: DocumentFormat,
        job_name: &str,
    ) -> Result<Option<i32>> {
        let payload = IppPayload::new(Cursor::new(document_bytes));

        let operation = IppOperationBuilder::print_job(self.uri.clone(), payload)
            .job_title(job_name)
            .document_format(format.mime_type())
            .build();

        let client = AsyncIppClient::new(self.uri.clone());

        info!(mime = format.mime_type(), "sending Print-Job");
        let response = client
            .send(operation)
            .await
            .map_err(|e| KeepaliveError::PrintSubmission(format!("Print-Job: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "Print-Job failed");
            return Err(KeepaliveError::PrintSubmission(format!(
                "Print-Job returned status {code:?}"
            )));
        }

        let job_id = extract_job_id(response.attributes());
        info!(job_id = ?job_id, "print job accepted by printer");
        Ok(job_id)
    }
}

// ---------------------------------------------------------------------------
// Helper functions for parsing IPP responses
// ---------------------------------------------------------------------------

/// Render one attribute value. Arrays are comma-joined without spaces so the
/// observation parser can split them back apart.
pub(crate) fn value_text(value: &IppValue) -> String {
    match value {
        IppValue::Array(items) => items
            .iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(","),
        other => format!("{other}"),
    }
}

/// Flatten the printer-attributes group(s) into a single map.
fn flatten_printer_attributes(attrs: &IppAttributes) -> AttributeMap {
    let mut map = HashMap::new();
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        for (name, attr) in group.attributes() {
            map.insert(name.clone(), value_text(attr.value()));
        }
    }
    map
}

fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .filter_map(|group| group.attributes().get("job-id"))
        .find_map(|attr| match attr.value() {
            IppValue::Integer(id) => Some(*id),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_uri() {
        assert!(IppClient::new("not a valid uri %%%").is_err());
    }

    #[test]
    fn new_accepts_valid_ipp_uri() {
        assert!(IppClient::new("ipp://192.168.1.100:631/ipp/print").is_ok());
    }

    #[test]
    fn arrays_are_comma_joined() {
        let levels = IppValue::Array(vec![
            IppValue::Integer(80),
            IppValue::Integer(-1),
            IppValue::Integer(12),
        ]);
        assert_eq!(value_text(&levels), "80,-1,12");
        assert_eq!(value_text(&IppValue::Enum(3)), "3");
        assert_eq!(value_text(&IppValue::Integer(42)), "42");
    }
}
