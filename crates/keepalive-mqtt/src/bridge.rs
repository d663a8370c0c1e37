// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// MQTT command bridge.
//
// The event loop only routes. Commands and hub-restart announcements go to
// one queue worker, so they apply in the order the broker delivered them.
// `print_now` is handed to its own task once dequeued; it can wait on the
// print lock, and must not hold up the queue or the broker connection.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

use keepalive_core::config::MqttConfig;
use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::payload::PrinterPayload;
use keepalive_core::types::PrintSource;
use keepalive_print::device::StatePublisher;
use keepalive_print::service::{KeepaliveService, SettingsUpdate};

use crate::discovery::discovery_messages;
use crate::topics::{Command, Inbound, Topics};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Outbound side of a broker connection.
#[async_trait]
pub trait MqttSink: Send + Sync {
    async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, filter: String) -> Result<()>;
}

#[async_trait]
impl MqttSink for AsyncClient {
    async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| KeepaliveError::Mqtt(format!("publish: {e}")))
    }

    async fn subscribe(&self, filter: String) -> Result<()> {
        AsyncClient::subscribe(self, filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| KeepaliveError::Mqtt(format!("subscribe: {e}")))
    }
}

struct Shared {
    sink: Arc<dyn MqttSink>,
    service: Arc<KeepaliveService>,
    topics: Topics,
    retain: bool,
    state: watch::Sender<ConnectionState>,
    jobs: mpsc::UnboundedSender<Queued>,
}

/// Inbound work, processed strictly in arrival order.
enum Job {
    Announce,
    Command { printer_id: String, command: Command },
}

struct Queued {
    job: Job,
    done: oneshot::Sender<()>,
}

/// Resolves once a routed message has been fully handled.
pub struct Completion(oneshot::Receiver<()>);

impl Completion {
    pub async fn wait(self) {
        // A dropped sender means the worker is gone; there is nothing left to wait for.
        let _ = self.0.await;
    }
}

/// Cloneable handle for everything that publishes through the bridge.
#[derive(Clone)]
pub struct MqttHandle {
    shared: Arc<Shared>,
}

impl MqttHandle {
    /// Build the handle and start its command worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        sink: Arc<dyn MqttSink>,
        service: Arc<KeepaliveService>,
        topics: Topics,
        retain: bool,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (jobs, queue) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            sink,
            service,
            topics,
            retain,
            state,
            jobs,
        });
        tokio::spawn(run_jobs(Arc::downgrade(&shared), queue));
        Self { shared }
    }

    pub fn topics(&self) -> &Topics {
        &self.shared.topics
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn set_connection_state(&self, next: ConnectionState) {
        let previous = self.shared.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "MQTT connection state changed");
        }
    }

    /// Session setup after a successful CONNACK.
    #[instrument(skip(self))]
    pub async fn on_connected(&self) -> Result<()> {
        let topics = &self.shared.topics;
        self.shared.sink.subscribe(topics.command_filter()).await?;
        self.shared.sink.subscribe(topics.hub_status()).await?;
        self.shared
            .sink
            .publish(topics.availability(), true, b"online".to_vec())
            .await?;
        self.publish_discovery().await?;
        self.publish_all_states().await
    }

    pub async fn publish_discovery(&self) -> Result<()> {
        for printer in self.shared.service.printers() {
            for message in discovery_messages(printer, &self.shared.topics) {
                let body = serde_json::to_vec(&message.payload)?;
                self.shared.sink.publish(message.topic, true, body).await?;
            }
        }
        debug!(printers = self.shared.service.printers().len(), "discovery published");
        Ok(())
    }

    pub async fn publish_all_states(&self) -> Result<()> {
        for payload in self.shared.service.all_payloads()? {
            self.publish_payload(&payload).await?;
        }
        Ok(())
    }

    async fn publish_payload(&self, payload: &PrinterPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.shared
            .sink
            .publish(self.shared.topics.state(&payload.printer_id), self.shared.retain, body)
            .await
    }

    /// Retained `offline` on the availability topic.
    pub async fn publish_offline(&self) -> Result<()> {
        self.shared
            .sink
            .publish(self.shared.topics.availability(), true, b"offline".to_vec())
            .await
    }

    /// Route one inbound message onto the command queue. Never blocks.
    /// Returns `None` for ignored messages.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<Completion> {
        let text = String::from_utf8_lossy(payload);
        let job = match self.shared.topics.classify(topic, &text) {
            Inbound::HubOnline => {
                info!("hub came online; republishing discovery and states");
                Job::Announce
            }
            Inbound::Command { printer_id, command } => Job::Command { printer_id, command },
            Inbound::Ignored => {
                debug!(topic, "ignoring MQTT message");
                return None;
            }
        };

        let (done, completion) = oneshot::channel();
        if self.shared.jobs.send(Queued { job, done }).is_err() {
            warn!(topic, "command queue closed; message dropped");
            return None;
        }
        Some(Completion(completion))
    }

    async fn announce(&self) -> Result<()> {
        self.publish_discovery().await?;
        self.publish_all_states().await
    }

    #[instrument(skip(self), fields(printer = %printer_id))]
    async fn execute(&self, printer_id: &str, command: Command) -> Result<()> {
        let service = &self.shared.service;
        if service.printer(printer_id).is_err() {
            debug!("command for unknown printer ignored");
            return Ok(());
        }

        let update = match command {
            Command::Template(template) => SettingsUpdate {
                template: Some(template),
                ..Default::default()
            },
            Command::CadenceHours(hours) => SettingsUpdate {
                cadence_hours: Some(i64::from(hours)),
                ..Default::default()
            },
            Command::Enabled(enabled) => SettingsUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
            Command::PrintNow => {
                let outcome = service
                    .run_keepalive(printer_id, None, PrintSource::Mqtt, false)
                    .await?;
                info!(?outcome, "print requested over MQTT");
                let payload = service.payload(printer_id)?;
                return self.publish_payload(&payload).await;
            }
        };

        let payload = service.update_settings(printer_id, update)?;
        self.publish_payload(&payload).await
    }
}

/// Drain the queue in order. Holds only a weak reference between jobs so the
/// worker ends once every handle is dropped.
async fn run_jobs(shared: Weak<Shared>, mut queue: mpsc::UnboundedReceiver<Queued>) {
    while let Some(Queued { job, done }) = queue.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let handle = MqttHandle { shared };
        match job {
            Job::Announce => {
                if let Err(e) = handle.announce().await {
                    warn!(error = %e, "republish after hub restart failed");
                }
                let _ = done.send(());
            }
            Job::Command {
                printer_id,
                command: Command::PrintNow,
            } => {
                tokio::spawn(async move {
                    if let Err(e) = handle.execute(&printer_id, Command::PrintNow).await {
                        warn!(printer = %printer_id, error = %e, "MQTT print request failed");
                    }
                    let _ = done.send(());
                });
            }
            Job::Command { printer_id, command } => {
                if let Err(e) = handle.execute(&printer_id, command).await {
                    warn!(printer = %printer_id, ?command, error = %e, "MQTT command failed");
                }
                let _ = done.send(());
            }
        }
    }
    debug!("MQTT command worker stopped");
}

#[async_trait]
impl StatePublisher for MqttHandle {
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    async fn publish_state(&self, payload: &PrinterPayload) -> Result<()> {
        self.publish_payload(payload).await
    }
}

// ---------------------------------------------------------------------------
// Network driver
// ---------------------------------------------------------------------------

pub struct MqttBridge {
    handle: MqttHandle,
    client: AsyncClient,
    eventloop: EventLoop,
    broker: String,
}

impl MqttBridge {
    pub fn new(config: &MqttConfig, service: Arc<KeepaliveService>) -> Self {
        let topics = Topics::from_config(config);

        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(
            topics.availability(),
            b"offline".to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let handle = MqttHandle::new(Arc::new(client.clone()), service, topics, config.retain);

        Self {
            handle,
            client,
            eventloop,
            broker: format!("{}:{}", config.host, config.port),
        }
    }

    pub fn handle(&self) -> MqttHandle {
        self.handle.clone()
    }

    /// Drive the connection until `shutdown` flips. Reconnects on error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(broker = %self.broker, "MQTT bridge starting");
        self.handle.set_connection_state(ConnectionState::Connecting);

        loop {
            tokio::select! {
                event = self.eventloop.poll() => self.on_event(event).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.goodbye().await;
    }

    async fn on_event(&mut self, event: std::result::Result<Event, rumqttc::ConnectionError>) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(code = ?ack.code, "MQTT broker refused connection");
                    return;
                }
                self.handle.set_connection_state(ConnectionState::Connected);
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle.on_connected().await {
                        error!(error = %e, "MQTT session setup failed");
                    }
                });
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                self.handle.handle_message(&p.topic, &p.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker sent disconnect");
                self.handle.set_connection_state(ConnectionState::Disconnected);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error; retrying");
                self.handle.set_connection_state(ConnectionState::Disconnected);
                tokio::time::sleep(RECONNECT_DELAY).await;
                self.handle.set_connection_state(ConnectionState::Connecting);
            }
        }
    }

    /// Best-effort offline announcement, then a clean disconnect.
    async fn goodbye(mut self) {
        if self.handle.is_connected() {
            if let Err(e) = self.client.try_publish(
                self.handle.topics().availability(),
                QoS::AtLeastOnce,
                true,
                b"offline".to_vec(),
            ) {
                debug!(error = %e, "offline publish not queued");
            }
            if let Err(e) = self.client.try_disconnect() {
                debug!(error = %e, "disconnect not queued");
            }
            let flush = async {
                loop {
                    match self.eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            };
            if tokio::time::timeout(Duration::from_secs(3), flush).await.is_err() {
                debug!("MQTT flush timed out");
            }
        }
        self.handle.set_connection_state(ConnectionState::Disconnected);
        info!("MQTT bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use keepalive_core::config::PrinterConfig;
    use keepalive_core::types::{DeviceClass, Template};
    use keepalive_print::testing::Harness;
    use serde_json::Value;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, bool, Vec<u8>)>>,
        subscriptions: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn published(&self) -> Vec<(String, bool, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }

        fn topics(&self) -> Vec<String> {
            self.published().into_iter().map(|(t, _, _)| t).collect()
        }

        fn last_state(&self, printer_id: &str) -> Option<Value> {
            let topic = format!("printer_keepalive/{printer_id}/state");
            self.published()
                .into_iter()
                .rev()
                .find(|(t, _, _)| *t == topic)
                .map(|(_, _, body)| serde_json::from_slice(&body).unwrap())
        }

        fn clear(&self) {
            self.published.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl MqttSink for RecordingSink {
        async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()> {
            self.published.lock().unwrap().push((topic, retain, payload));
            Ok(())
        }

        async fn subscribe(&self, filter: String) -> Result<()> {
            self.subscriptions.lock().unwrap().push(filter);
            Ok(())
        }
    }

    fn bridge(h: &Harness) -> (MqttHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let handle = MqttHandle::new(
            sink.clone(),
            Arc::clone(&h.service),
            Topics::new("printer_keepalive", "homeassistant"),
            true,
        );
        (handle, sink)
    }

    fn printers() -> Vec<PrinterConfig> {
        vec![
            PrinterConfig::new("office", "ipp://10.0.0.5/ipp/print", DeviceClass::Inkjet),
            PrinterConfig::new("garage", "ipp://10.0.0.6/ipp/print", DeviceClass::Laser),
        ]
    }

    async fn send(handle: &MqttHandle, topic: &str, payload: &str) {
        if let Some(done) = handle.handle_message(topic, payload.as_bytes()) {
            done.wait().await;
        }
    }

    #[tokio::test]
    async fn connect_sequence_subscribes_then_announces() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);
        handle.on_connected().await.unwrap();

        assert_eq!(
            *sink.subscriptions.lock().unwrap(),
            vec!["printer_keepalive/+/set/#".to_owned(), "homeassistant/status".to_owned()]
        );

        let published = sink.published();
        assert_eq!(published[0], ("printer_keepalive/status".into(), true, b"online".to_vec()));
        let discovery = published
            .iter()
            .filter(|(t, retain, _)| t.starts_with("homeassistant/") && *retain)
            .count();
        assert_eq!(discovery, 32);
        assert!(sink.last_state("office").is_some());
        assert!(sink.last_state("garage").is_some());
    }

    #[tokio::test]
    async fn hub_restart_republishes_identical_discovery() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);
        handle.publish_discovery().await.unwrap();
        let first = sink.published();
        sink.clear();

        send(&handle, "homeassistant/status", "online").await;
        let second: Vec<_> = sink
            .published()
            .into_iter()
            .filter(|(t, _, _)| t.starts_with("homeassistant/"))
            .collect();
        assert_eq!(first, second);
        assert!(sink.last_state("office").is_some());
    }

    #[tokio::test]
    async fn cadence_command_is_clamped_and_published() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);

        send(&handle, "printer_keepalive/office/set/cadence_hours", "5000").await;
        assert_eq!(h.store.snapshot("office").unwrap().cadence_hours_override, Some(720));
        assert_eq!(sink.last_state("office").unwrap()["cadence_hours"], 720);
    }

    #[tokio::test]
    async fn enabled_and_template_commands_apply() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);

        send(&handle, "printer_keepalive/garage/set/enabled", "OFF").await;
        send(&handle, "printer_keepalive/garage/set/template", "entity_report").await;

        let state = h.store.snapshot("garage").unwrap();
        assert_eq!(state.enabled_override, Some(false));
        assert_eq!(state.template_override, Some(Template::EntityReport));
        let payload = sink.last_state("garage").unwrap();
        assert_eq!(payload["enabled"], false);
        assert_eq!(payload["template"], "entity_report");
    }

    #[tokio::test]
    async fn invalid_and_unknown_commands_change_nothing() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);

        send(&handle, "printer_keepalive/office/set/template", "poster").await;
        send(&handle, "printer_keepalive/nobody/set/enabled", "ON").await;
        send(&handle, "printer_keepalive/office/set", "ON").await;
        send(&handle, "printer_keepalive/office/set/paper", "A4").await;

        assert!(sink.published().is_empty());
        let state = h.store.snapshot("office").unwrap();
        assert!(state.template_override.is_none());
        assert!(h.store.snapshot("nobody").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn commands_apply_in_delivery_order() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);
        let topic = "printer_keepalive/office/set/enabled";

        for round in 0..100 {
            let mut pending = Vec::new();
            for flag in ["ON", "OFF", "ON", "OFF"] {
                pending.extend(handle.handle_message(topic, flag.as_bytes()));
            }
            for done in pending {
                done.wait().await;
            }
            assert_eq!(
                h.store.snapshot("office").unwrap().enabled_override,
                Some(false),
                "round {round}"
            );
            assert_eq!(sink.last_state("office").unwrap()["enabled"], false, "round {round}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn print_now_does_not_hold_up_later_commands() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);
        let lock = h.executor.print_lock();
        let guard = lock.lock().await;

        let print = handle
            .handle_message("printer_keepalive/office/set/print_now", b"PRESS")
            .unwrap();
        let template = handle
            .handle_message("printer_keepalive/office/set/template", b"entity_report")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), template.wait())
            .await
            .expect("settings command completes while a print waits");
        assert_eq!(sink.last_state("office").unwrap()["template"], "entity_report");
        assert_eq!(h.submitter.submissions(), 0);

        drop(guard);
        print.wait().await;
        assert_eq!(h.submitter.submissions(), 1);
    }

    #[tokio::test]
    async fn print_now_forces_a_print() {
        let h = Harness::new(printers());
        let (handle, sink) = bridge(&h);

        // Not due: the record was anchored moments ago.
        send(&handle, "printer_keepalive/office/set/print_now", "PRESS").await;

        assert_eq!(h.submitter.submissions(), 1);
        let payload = sink.last_state("office").unwrap();
        assert_eq!(payload["keepalive_print_count"], 1);
        assert_eq!(payload["last_keepalive_result"], "success");
    }

    #[tokio::test]
    async fn connection_state_drives_is_connected() {
        let h = Harness::new(printers());
        let (handle, _sink) = bridge(&h);
        let mut rx = handle.subscribe_state();

        assert!(!handle.is_connected());
        handle.set_connection_state(ConnectionState::Connecting);
        assert!(!handle.is_connected());
        handle.set_connection_state(ConnectionState::Connected);
        assert!(handle.is_connected());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        handle.publish_offline().await.unwrap();
    }
}
