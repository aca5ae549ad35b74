//! Topic and payload decoding for inbound device traffic.
//!
//! Topics look like `<base>/<device>/<kind>`. Payloads are decoded as a JSON
//! object when possible and kept as text otherwise; decoding never fails.

use crate::models::{DeviceId, MessageKind, Payload, RawMessage};
use serde_json::{Map, Value};
use time::OffsetDateTime;

const UNKNOWN_SEGMENT: &str = "unknown";

/// Device `timestamp` values above this are epoch milliseconds, below it uptime seconds.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is JSON but not an object")]
    NotAnObject,
}

/// What a device-reported `timestamp` field turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceClock {
    /// Absolute wall-clock time (epoch milliseconds).
    Absolute(OffsetDateTime),
    /// Seconds since boot; not usable as a wall-clock time.
    Uptime(f64),
    /// Missing, non-numeric, non-positive or out of range.
    Unusable,
}

/// Splits `<base>/<device>/<kind>`; absent or empty segments become `"unknown"`.
pub fn decode_topic(topic: &str) -> (DeviceId, MessageKind) {
    let mut segments = topic.split('/').skip(1);
    let mut next = || {
        segments
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SEGMENT)
            .to_string()
    };
    let device = next();
    let kind = next();
    (device, kind)
}

fn decode_structured(raw: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}

pub fn decode_payload(raw: &[u8]) -> Payload {
    match decode_structured(raw) {
        Ok(map) => Payload::Structured(map),
        Err(e) => {
            tracing::trace!(error = %e, "keeping payload as opaque text");
            Payload::Opaque(String::from_utf8_lossy(raw).into_owned())
        }
    }
}

/// Builds the immutable record for one inbound publish.
pub fn decode_message(topic: &str, raw: &[u8], received_at: OffsetDateTime) -> RawMessage {
    let (device, kind) = decode_topic(topic);
    RawMessage {
        topic: topic.to_string(),
        payload: decode_payload(raw),
        device,
        kind,
        received_at,
    }
}

pub fn classify_device_clock(payload: &Payload) -> DeviceClock {
    let Some(value) = payload.field("timestamp").and_then(Value::as_f64) else {
        return DeviceClock::Unusable;
    };
    if value > EPOCH_MILLIS_THRESHOLD {
        let nanos = (value * 1_000_000.0) as i128;
        match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
            Ok(at) => DeviceClock::Absolute(at),
            Err(_) => DeviceClock::Unusable,
        }
    } else if value > 0.0 {
        DeviceClock::Uptime(value)
    } else {
        DeviceClock::Unusable
    }
}

/// Time a message is considered to describe: the device clock when it is
/// absolute, the receipt time in every other case.
pub fn effective_timestamp(payload: &Payload, received_at: OffsetDateTime) -> OffsetDateTime {
    match classify_device_clock(payload) {
        DeviceClock::Absolute(at) => at,
        DeviceClock::Uptime(secs) => {
            tracing::trace!(uptime_secs = secs, "device clock is uptime, using receipt time");
            received_at
        }
        DeviceClock::Unusable => received_at,
    }
}
