//! In-memory view of what every device reported last.
//!
//! Written by the ingestion worker only; HTTP handlers and observers read
//! through the lock and get owned copies back.

use crate::models::{DeviceState, DevicesMap, KindState, RawMessage};
use crate::topic::effective_timestamp;
use parking_lot::RwLock;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Default)]
struct StoreInner {
    devices: DevicesMap,
    history: VecDeque<RawMessage>,
}

pub struct DeviceStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl DeviceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a message in the history ring and merges it into its device's
    /// state. Returns the device state after the merge.
    pub fn ingest(&self, message: RawMessage) -> DeviceState {
        let effective = effective_timestamp(&message.payload, message.received_at);
        let mut inner = self.inner.write();

        let state = inner
            .devices
            .entry(message.device.clone())
            .or_insert_with(|| DeviceState::new(effective));
        state.kinds.insert(
            message.kind.clone(),
            KindState { payload: message.payload.clone(), timestamp: effective },
        );
        // every message counts as a sign of life, whatever its kind
        state.last_seen = effective;
        let updated = state.clone();

        inner.history.push_back(message);
        while inner.history.len() > self.capacity {
            inner.history.pop_front();
        }
        updated
    }

    pub fn snapshot(&self) -> DevicesMap {
        self.inner.read().devices.clone()
    }

    /// History ring contents, oldest first.
    pub fn recent_history(&self) -> Vec<RawMessage> {
        self.inner.read().history.iter().cloned().collect()
    }

    pub fn device(&self, id: &str) -> Option<DeviceState> {
        self.inner.read().devices.get(id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
