use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub messages_buffered: u32,
    pub history_capacity: u32,
    pub observers: u32,
    pub mqtt_status: String,
    pub broker: String,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

/// Counters the service hands over when a health report is requested.
pub struct HealthInputs<'a> {
    pub devices_tracked: usize,
    pub messages_buffered: usize,
    pub history_capacity: usize,
    pub observers: usize,
    pub connected: bool,
    pub broker: &'a str,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, inputs: HealthInputs<'_>) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: saturating_u32(inputs.devices_tracked),
            messages_buffered: saturating_u32(inputs.messages_buffered),
            history_capacity: saturating_u32(inputs.history_capacity),
            observers: saturating_u32(inputs.observers),
            mqtt_status: if inputs.connected { "connected" } else { "disconnected" }.to_string(),
            broker: inputs.broker.to_string(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_report() {
        let tracker = HealthTracker::new();
        let health = tracker.get_health(HealthInputs {
            devices_tracked: 3,
            messages_buffered: 42,
            history_capacity: 100,
            observers: 2,
            connected: false,
            broker: "localhost",
        });
        assert_eq!(health.devices_tracked, 3);
        assert_eq!(health.messages_buffered, 42);
        assert_eq!(health.mqtt_status, "disconnected");
        assert_eq!(health.broker, "localhost");
        assert!(health.memory_usage_mb >= 0.0);
    }

    #[test]
    fn test_large_counts_saturate() {
        let health = HealthTracker::new().get_health(HealthInputs {
            devices_tracked: usize::MAX,
            messages_buffered: 0,
            history_capacity: usize::MAX,
            observers: 1,
            connected: true,
            broker: "localhost",
        });
        assert_eq!(health.devices_tracked, u32::MAX);
        assert_eq!(health.history_capacity, u32::MAX);
        assert_eq!(health.observers, 1);
        assert_eq!(health.mqtt_status, "connected");
    }
}
