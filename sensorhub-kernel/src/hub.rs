//! Fan-out of device events to connected observers (dashboard websockets).
//!
//! Each observer owns a bounded channel, so events keep their emission order
//! per observer; there is no ordering across observers. Delivery is best
//! effort: an observer whose queue is full misses events until it catches up.

use crate::gateway::CommandResult;
use crate::models::{DeviceId, DeviceState, DevicesMap, RawMessage};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Events queued per observer before further ones are dropped for it.
pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct InitialState {
    pub devices: DevicesMap,
    pub messages: Vec<RawMessage>,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateUpdate {
    pub device: DeviceId,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Connectivity {
    pub connected: bool,
    pub broker: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Connectivity {
    pub fn now(connected: bool, broker: &str, error: Option<String>) -> Self {
        Self {
            connected,
            broker: broker.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            error,
        }
    }
}

/// Events pushed to observers, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    InitialState(InitialState),
    StateUpdate(StateUpdate),
    MqttMessage(RawMessage),
    ConnectivityChanged(Connectivity),
    CommandResult(CommandResult),
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::InitialState(_) => "initial_state",
            HubEvent::StateUpdate(_) => "state_update",
            HubEvent::MqttMessage(_) => "mqtt_message",
            HubEvent::ConnectivityChanged(_) => "connectivity_changed",
            HubEvent::CommandResult(_) => "command_result",
        }
    }
}

#[derive(Default)]
pub struct BroadcastHub {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<HubEvent>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer. `initial` is built while the observer set is
    /// locked, so no broadcast can slip between the snapshot and the
    /// registration.
    pub fn attach<F>(&self, initial: F) -> (ObserverId, mpsc::Receiver<HubEvent>)
    where
        F: FnOnce() -> HubEvent,
    {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE_CAPACITY);
        let mut observers = self.observers.lock();
        // fresh queue with rx still held, the send cannot fail
        let _ = tx.try_send(initial());
        observers.insert(id, tx);
        tracing::info!(observer = %id, observers = observers.len(), "observer attached");
        (id, rx)
    }

    pub fn detach(&self, id: &ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let removed = observers.remove(id).is_some();
        if removed {
            tracing::info!(observer = %id, observers = observers.len(), "observer detached");
        }
        removed
    }

    /// Sends to every observer without waiting. Observers whose receiver is
    /// gone are dropped; observers with a full queue miss this event.
    /// Returns the number of observers reached.
    pub fn broadcast(&self, event: HubEvent) -> usize {
        let mut observers = self.observers.lock();
        let mut reached = 0;
        observers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                reached += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(observer = %id, event = event.name(), "observer queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(observer = %id, "dropping closed observer");
                false
            }
        });
        tracing::debug!(event = event.name(), receivers = reached, "event broadcast");
        reached
    }

    /// Sends to a single observer only.
    pub fn send_to(&self, id: &ObserverId, event: HubEvent) -> bool {
        let observers = self.observers.lock();
        observers.get(id).is_some_and(|tx| tx.try_send(event).is_ok())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}
