use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Identifier a device publishes under (second topic segment).
pub type DeviceId = String;
/// Third topic segment: what kind of state the message reports.
pub type MessageKind = String;

/// Placeholder used for roster fields of devices that only exist on the broker.
pub const UNKNOWN: &str = "Unknown";

/// Decoded MQTT payload: a JSON object when the device sent one, raw text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Structured(Map<String, Value>),
    Opaque(String),
}

impl Payload {
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Payload::Structured(map) => map.get(name),
            Payload::Opaque(_) => None,
        }
    }
}

/// One inbound message as it was received. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Payload,
    pub device: DeviceId,
    pub kind: MessageKind,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

/// Latest value reported for one message kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindState {
    pub payload: Payload,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub kinds: BTreeMap<MessageKind, KindState>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl DeviceState {
    pub fn new(first_seen: OffsetDateTime) -> Self {
        Self { kinds: BTreeMap::new(), last_seen: first_seen }
    }
}

pub type DevicesMap = BTreeMap<DeviceId, DeviceState>;

/// A device as described in the static inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub chip_id: String,
    pub platform: String,
    pub display: String,
    pub ip: String,
    pub status: String,
    pub last_update: String,
}

/// Display view of a device: inventory metadata merged with live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledDevice {
    pub name: String,
    pub chip_id: String,
    pub platform: String,
    pub display: String,
    pub ip: String,
    pub status: String,
    pub last_update: String,
    /// false when the device was synthesized from a live identifier alone
    pub in_roster: bool,
    pub mqtt_name: DeviceId,
    pub online: bool,
    pub mqtt_state: Option<DeviceState>,
}
