/**
 * HUB SERVICE - Device state aggregation and broadcast
 *
 * ROLE: owns the device store, the observer hub, the broker transport and
 * the inventory. Built once in `main` and shared with the HTTP layer.
 *
 * INGESTION: a single worker task drains the transport's inbound channel and
 * is the only writer of the store. Each message is decoded, merged, then
 * announced to observers (`mqtt_message` followed by `state_update`).
 */

use crate::config::HubConfig;
use crate::gateway::{CommandError, CommandGateway, CommandResult};
use crate::health::{HealthInputs, HealthTracker, KernelHealth};
use crate::hub::{BroadcastHub, HubEvent, InitialState, ObserverId, StateUpdate};
use crate::models::{DeviceState, RawMessage, ReconciledDevice};
use crate::mqtt::{InboundMessage, MqttTransport, Transport, TransportError};
use crate::reconcile::reconcile;
use crate::roster::RosterProvider;
use crate::store::DeviceStore;
use crate::topic::decode_message;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct HubService {
    store: Arc<DeviceStore>,
    hub: Arc<BroadcastHub>,
    transport: Arc<MqttTransport>,
    gateway: CommandGateway,
    roster: Arc<dyn RosterProvider>,
    health: HealthTracker,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HubService {
    pub fn new(cfg: &HubConfig, roster: Arc<dyn RosterProvider>) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let transport = Arc::new(MqttTransport::new(cfg.mqtt.clone(), hub.clone()));
        let gateway = CommandGateway::new(transport.clone(), cfg.mqtt.command_template());
        Self {
            store: Arc::new(DeviceStore::new(cfg.history_capacity)),
            hub,
            transport,
            gateway,
            roster,
            health: HealthTracker::new(),
            worker: Mutex::new(None),
        }
    }

    /// Connects to the broker and starts the ingestion worker. On failure the
    /// service keeps serving whatever state it has; call again to retry.
    pub async fn start(&self) -> Result<(), TransportError> {
        let inbound = self.transport.connect().await?;
        let worker = tokio::spawn(run_ingest(inbound, self.store.clone(), self.hub.clone()));
        if let Some(previous) = self.worker.lock().replace(worker) {
            previous.abort();
        }
        Ok(())
    }

    /// Disconnects from the broker. The worker ends once the inbound channel closes.
    pub fn stop(&self) {
        self.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn initial_state(&self) -> HubEvent {
        HubEvent::InitialState(InitialState {
            devices: self.store.snapshot(),
            messages: self.store.recent_history(),
            connected: self.is_connected(),
        })
    }

    pub fn attach_observer(&self) -> (ObserverId, mpsc::Receiver<HubEvent>) {
        self.hub.attach(|| self.initial_state())
    }

    pub fn detach_observer(&self, id: &ObserverId) {
        self.hub.detach(id);
    }

    pub fn devices(&self) -> Vec<ReconciledDevice> {
        reconcile(&self.roster.load(), &self.store.snapshot())
    }

    pub fn device(&self, id: &str) -> Option<DeviceState> {
        self.store.device(id)
    }

    pub fn messages(&self) -> Vec<RawMessage> {
        self.store.recent_history()
    }

    pub fn send_command(&self, device: &str, command: &str) -> Result<CommandResult, CommandError> {
        self.gateway.send_command(device, command)
    }

    /// Runs a command on behalf of an observer; the outcome, success or not,
    /// goes back to that observer only.
    pub fn command_from_observer(&self, observer: &ObserverId, device: &str, command: &str) {
        let result = self
            .send_command(device, command)
            .unwrap_or_else(|e| {
                info!(observer = %observer, error = %e, "observer command rejected");
                CommandResult::rejected(device, command, &e)
            });
        self.hub.send_to(observer, HubEvent::CommandResult(result));
    }

    pub fn health(&self) -> KernelHealth {
        self.health.get_health(HealthInputs {
            devices_tracked: self.store.device_count(),
            messages_buffered: self.store.history_len(),
            history_capacity: self.store.capacity(),
            observers: self.hub.observer_count(),
            connected: self.is_connected(),
            broker: self.transport.broker(),
        })
    }
}

fn ingest_one(inbound: InboundMessage, store: &DeviceStore, hub: &BroadcastHub) {
    let message = decode_message(&inbound.topic, &inbound.payload, inbound.received_at);
    let device = message.device.clone();
    // merge before announcing, so a snapshot taken in between already has it
    let state = store.ingest(message.clone());
    hub.broadcast(HubEvent::MqttMessage(message));
    hub.broadcast(HubEvent::StateUpdate(StateUpdate { device, state }));
}

/// Sole writer of the store. A message that fails to process is logged and
/// dropped; the loop only ends when the inbound channel closes.
pub async fn run_ingest(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    store: Arc<DeviceStore>,
    hub: Arc<BroadcastHub>,
) {
    info!("ingestion worker started");
    while let Some(message) = inbound.recv().await {
        let topic = message.topic.clone();
        if catch_unwind(AssertUnwindSafe(|| ingest_one(message, &store, &hub))).is_err() {
            error!(topic = %topic, "failed to ingest message, dropped");
        }
    }
    info!("ingestion worker stopped");
}
