// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS discovery of IPP and IPPS printers on the local network.
//
// A scan browses `_ipp._tcp.local.` (and `_ipps._tcp.local.` when enabled)
// for a bounded window, then probes each resolved service with a short
// Get-Printer-Attributes to fill in its name, model and reachability.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, instrument, warn};
use url::Url;

use keepalive_core::config::{DiscoveryConfig, PrinterConfig, normalize_printer_uri};
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::types::{DeviceClass, DiscoveryCandidate};

use crate::device::{DeviceQuery, DiscoveryProvider};

/// mDNS service type for plain IPP.
const IPP_SERVICE: &str = "_ipp._tcp.local.";

/// mDNS service type for TLS-secured IPP.
const IPPS_SERVICE: &str = "_ipps._tcp.local.";

/// How long one `recv_timeout` waits before checking the other receiver.
const RECV_SLICE: Duration = Duration::from_millis(100);

/// A resolved mDNS service, reduced to what candidate building needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedService {
    pub fullname: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub secure: bool,
    /// TXT `rp`: resource path, e.g. `ipp/print`.
    pub resource_path: Option<String>,
    /// TXT `ty`: human-readable make and model.
    pub make_and_model: Option<String>,
}

impl ResolvedService {
    fn from_info(info: &ServiceInfo, secure: bool) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        // IPv4 first for wider printer compatibility.
        addresses.sort_by_key(|a| (!a.is_ipv4(), *a));

        Self {
            fullname: info.get_fullname().to_owned(),
            hostname: info.get_hostname().trim_end_matches('.').to_owned(),
            addresses,
            port: info.get_port(),
            secure,
            resource_path: info.get_property_val_str("rp").map(str::to_owned),
            make_and_model: info
                .get_property_val_str("ty")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        }
    }

    /// Display label: the TXT model, else the instance part of the name.
    pub fn label(&self) -> String {
        if let Some(ty) = &self.make_and_model {
            return ty.clone();
        }
        let instance = self.fullname.split("._").next().unwrap_or("").trim();
        if instance.is_empty() {
            "Discovered Printer".to_owned()
        } else {
            instance.to_owned()
        }
    }

    pub fn uri(&self) -> Option<String> {
        let host = match self.addresses.first() {
            Some(IpAddr::V6(v6)) => format!("[{v6}]"),
            Some(IpAddr::V4(v4)) => v4.to_string(),
            None if !self.hostname.is_empty() => self.hostname.clone(),
            None => return None,
        };
        let scheme = if self.secure { "ipps" } else { "ipp" };
        let path = self.resource_path.as_deref().unwrap_or("").trim().trim_matches('/');
        normalize_printer_uri(&format!("{scheme}://{host}:{}/{path}", self.port)).ok()
    }
}

/// Turn a resolved service into a candidate, before any device probe.
pub fn build_candidate(service: &ResolvedService, configured: &[PrinterConfig]) -> Option<DiscoveryCandidate> {
    let uri = service.uri()?;
    let host = host_of(&uri).unwrap_or_default();
    let label = service.label();
    let model = service.make_and_model.clone().unwrap_or_default();

    let already_configured = configured.iter().any(|p| {
        p.uri == uri || (!host.is_empty() && host_of(&p.uri).is_some_and(|h| h == host))
    });

    Some(DiscoveryCandidate {
        service_name: service.fullname.clone(),
        uri,
        host,
        port: service.port,
        secure: service.secure,
        reachable: false,
        error: None,
        device_class_guess: DeviceClass::infer_from_text(&[&label, &model]),
        printer_name: label,
        make_and_model: model,
        already_configured,
    })
}

fn host_of(uri: &str) -> Option<String> {
    Url::parse(uri)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_ascii_lowercase()))
}

// ---------------------------------------------------------------------------
// mDNS provider
// ---------------------------------------------------------------------------

pub struct MdnsDiscovery {
    config: DiscoveryConfig,
    probe: Arc<dyn DeviceQuery>,
}

impl MdnsDiscovery {
    pub fn new(config: DiscoveryConfig, probe: Arc<dyn DeviceQuery>) -> Self {
        Self { config, probe }
    }

    /// Browse for the configured window. Blocking; run off the async executor.
    fn browse(window: Duration, include_ipps: bool) -> Result<Vec<ResolvedService>> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| KeepaliveError::Discovery(format!("failed to start mDNS daemon: {e}")))?;

        let mut service_types = vec![(IPP_SERVICE, false)];
        if include_ipps {
            service_types.push((IPPS_SERVICE, true));
        }

        let mut receivers = Vec::with_capacity(service_types.len());
        for (service_type, secure) in &service_types {
            let rx = daemon
                .browse(service_type)
                .map_err(|e| KeepaliveError::Discovery(format!("browse {service_type}: {e}")))?;
            receivers.push((rx, *secure));
        }

        let mut found: BTreeMap<String, ResolvedService> = BTreeMap::new();
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            for (rx, secure) in &receivers {
                let Ok(event) = rx.recv_timeout(RECV_SLICE) else {
                    continue;
                };
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let service = ResolvedService::from_info(&info, *secure);
                        debug!(name = %service.fullname, port = service.port, "service resolved");
                        found.insert(service.fullname.clone(), service);
                    }
                    ServiceEvent::ServiceRemoved(stype, fullname) => {
                        debug!(service_type = %stype, name = %fullname, "service removed");
                        found.remove(&fullname);
                    }
                    other => debug!(event = ?other, "mDNS event"),
                }
            }
        }

        for (service_type, _) in &service_types {
            if let Err(e) = daemon.stop_browse(service_type) {
                debug!(service_type, error = %e, "stop browse failed");
            }
        }
        if let Err(e) = daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }

        Ok(found.into_values().collect())
    }
}

#[async_trait]
impl DiscoveryProvider for MdnsDiscovery {
    #[instrument(skip_all, fields(include_ipps = self.config.include_ipps))]
    async fn scan(&self, configured: &[PrinterConfig]) -> Result<Vec<DiscoveryCandidate>> {
        let window = Duration::from_secs(u64::from(self.config.timeout_seconds));
        let include_ipps = self.config.include_ipps;
        let services = tokio::task::spawn_blocking(move || Self::browse(window, include_ipps))
            .await
            .map_err(|e| KeepaliveError::Discovery(format!("browse task aborted: {e}")))??;

        let probe_timeout = Duration::from_secs(u64::from(self.config.ipp_query_timeout_seconds));
        let mut candidates: Vec<DiscoveryCandidate> = Vec::new();
        for service in &services {
            let Some(mut candidate) = build_candidate(service, configured) else {
                warn!(name = %service.fullname, "resolved service has no usable address");
                continue;
            };
            if candidates.iter().any(|c| c.uri == candidate.uri) {
                continue;
            }

            match self.probe.query_attributes(&candidate.uri, probe_timeout).await {
                Ok(attrs) => {
                    candidate.reachable = true;
                    if let Some(name) = attrs.get("printer-name").map(|s| s.trim()).filter(|s| !s.is_empty()) {
                        candidate.printer_name = name.to_owned();
                    }
                    if let Some(model) = attrs
                        .get("printer-make-and-model")
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                    {
                        candidate.make_and_model = model.to_owned();
                    }
                    candidate.device_class_guess = DeviceClass::infer_from_text(&[
                        &candidate.printer_name,
                        &candidate.make_and_model,
                    ]);
                }
                Err(e) => {
                    debug!(uri = %candidate.uri, error = %e, "discovery probe failed");
                    candidate.error = Some(e.to_string());
                }
            }
            candidates.push(candidate);
        }

        info!(count = candidates.len(), "discovery scan finished");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn service(addresses: Vec<IpAddr>, rp: Option<&str>, ty: Option<&str>) -> ResolvedService {
        ResolvedService {
            fullname: "Office Jet._ipp._tcp.local.".into(),
            hostname: "officejet.local".into(),
            addresses,
            port: 631,
            secure: false,
            resource_path: rp.map(str::to_owned),
            make_and_model: ty.map(str::to_owned),
        }
    }

    #[test]
    fn uri_uses_address_port_and_resource_path() {
        let svc = service(vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))], Some("ipp/print"), None);
        assert_eq!(svc.uri().as_deref(), Some("ipp://192.168.1.40:631/ipp/print"));

        let bare = service(vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))], None, None);
        assert_eq!(bare.uri().as_deref(), Some("ipp://192.168.1.40:631/ipp/print"));
    }

    #[test]
    fn ipv6_hosts_are_bracketed_and_hostname_is_fallback() {
        let v6 = service(vec![IpAddr::V6(Ipv6Addr::LOCALHOST)], Some("ipp/print"), None);
        assert_eq!(v6.uri().as_deref(), Some("ipp://[::1]:631/ipp/print"));

        let named = service(Vec::new(), Some("printers/lobby"), None);
        assert_eq!(named.uri().as_deref(), Some("ipp://officejet.local:631/printers/lobby"));
    }

    #[test]
    fn candidate_guesses_class_and_matches_configured_host() {
        let svc = service(
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))],
            Some("ipp/print"),
            Some("Brother HL-L2350DW series"),
        );
        let configured = vec![PrinterConfig::new(
            "hall",
            "ipp://10.0.0.9:631/ipp/other",
            DeviceClass::Laser,
        )];

        let candidate = build_candidate(&svc, &configured).unwrap();
        assert_eq!(candidate.printer_name, "Brother HL-L2350DW series");
        assert_eq!(candidate.device_class_guess, DeviceClass::Laser);
        assert!(candidate.already_configured);
        assert_eq!(candidate.host, "10.0.0.9");

        let fresh = build_candidate(&svc, &[]).unwrap();
        assert!(!fresh.already_configured);
    }

    #[test]
    fn label_falls_back_to_instance_name() {
        let svc = service(vec![], None, None);
        assert_eq!(svc.label(), "Office Jet");
        assert_eq!(
            DeviceClass::infer_from_text(&[&svc.label()]),
            DeviceClass::Unknown
        );
    }

    #[test]
    fn service_without_any_host_is_dropped() {
        let mut svc = service(vec![], None, None);
        svc.hostname.clear();
        assert!(build_candidate(&svc, &[]).is_none());
    }
}
