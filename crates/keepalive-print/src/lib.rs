// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keepalive Print: everything that touches a printer or the state file. The
// IPP client and mDNS discovery talk to devices; the store, poller, executor
// and scheduler turn decisions from `keepalive-core` into maintenance prints.

pub mod device;
pub mod discovery;
pub mod executor;
pub mod ipp_client;
pub mod poller;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use device::{DeviceQuery, DiscoveryProvider, IppDevice, PrintSubmitter, StatePublisher};
pub use discovery::MdnsDiscovery;
pub use executor::{KeepaliveOutcome, PrintExecutor, PrintReport, SkipReason};
pub use ipp_client::IppClient;
pub use poller::DevicePoller;
pub use scheduler::{Scheduler, SchedulerPhase, TickReport};
pub use service::{KeepaliveService, SettingsUpdate};
pub use store::StateStore;
