use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::{info, warn};

use crate::store::DEFAULT_HISTORY_CAPACITY;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub history_capacity: usize,
    pub inventory_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub base_topic: String,
    /// Publish topic for commands; `{device}` is substituted. Derived from
    /// `base_topic` when absent.
    pub command_topic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub host: String,
    pub port: u16,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "mqtt-admin-panel".into(),
            keep_alive_secs: 60,
            base_topic: "esp-sensor-hub".into(),
            command_topic: None,
        }
    }
}

impl MqttConf {
    pub fn command_template(&self) -> String {
        self.command_topic
            .clone()
            .unwrap_or_else(|| format!("{}/{{device}}/command", self.base_topic))
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 5000 }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            inventory_path: "../temperature-sensor/docs/DEVICE_INVENTORY.md".into(),
        }
    }
}

fn parse_override<T: FromStr>(key: &str, raw: String, target: &mut T) {
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

impl HubConfig {
    /// Applies environment-style overrides; `lookup` returns the value of a key.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MQTT_BROKER") { self.mqtt.host = v; }
        if let Some(v) = lookup("MQTT_PORT") { parse_override("MQTT_PORT", v, &mut self.mqtt.port); }
        if let Some(v) = lookup("MQTT_USERNAME") { self.mqtt.username = v; }
        if let Some(v) = lookup("MQTT_PASSWORD") { self.mqtt.password = v; }
        if let Some(v) = lookup("MQTT_CLIENT_ID") { self.mqtt.client_id = v; }
        if let Some(v) = lookup("MQTT_BASE_TOPIC") { self.mqtt.base_topic = v; }
        if let Some(v) = lookup("HTTP_HOST") { self.http.host = v; }
        if let Some(v) = lookup("HTTP_PORT") { parse_override("HTTP_PORT", v, &mut self.http.port); }
        if let Some(v) = lookup("DEVICE_INVENTORY_PATH") { self.inventory_path = v; }
        if let Some(v) = lookup("HISTORY_CAPACITY") {
            parse_override("HISTORY_CAPACITY", v, &mut self.history_capacity);
        }
    }

    /// Raises values the service cannot run with to their minimum.
    pub fn sanitize(&mut self) {
        if self.history_capacity == 0 {
            warn!("history_capacity of 0 is not usable, keeping 1 message");
            self.history_capacity = 1;
        }
    }
}

async fn load_file(path: &str) -> HubConfig {
    if !Path::new(path).exists() {
        info!(path, "no config file, using defaults");
        return HubConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return HubConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path, error = %e, "invalid config file, using defaults");
        HubConfig::default()
    })
}

/// YAML file named by `SENSORHUB_CONFIG` (default `sensorhub.yaml`), then
/// environment overrides.
pub async fn load_config() -> HubConfig {
    let path = std::env::var("SENSORHUB_CONFIG").unwrap_or_else(|_| "sensorhub.yaml".into());
    let mut cfg = load_file(&path).await;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    cfg.sanitize();
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.http.port, 5000);
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.mqtt.command_template(), "esp-sensor-hub/{device}/command");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MQTT_BROKER", "broker.lan"),
            ("MQTT_PORT", "8883"),
            ("HTTP_PORT", "not-a-port"),
            ("MQTT_BASE_TOPIC", "surveillance"),
        ]);
        let mut cfg = HubConfig::default();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.http.port, 5000);
        assert_eq!(cfg.mqtt.command_template(), "surveillance/{device}/command");
    }

    #[test]
    fn test_zero_history_capacity_is_raised() {
        let mut cfg = HubConfig::default();
        cfg.apply_overrides(|key| (key == "HISTORY_CAPACITY").then(|| "0".to_string()));
        assert_eq!(cfg.history_capacity, 0);
        cfg.sanitize();
        assert_eq!(cfg.history_capacity, 1);

        let mut cfg = HubConfig::default();
        cfg.sanitize();
        assert_eq!(cfg.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[tokio::test]
    async fn test_partial_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mqtt:\n  host: 10.0.0.2\n  command_topic: hub/{{device}}/cmd\nhistory_capacity: 10").unwrap();
        let cfg = load_file(file.path().to_str().unwrap()).await;
        assert_eq!(cfg.mqtt.host, "10.0.0.2");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.history_capacity, 10);
        assert_eq!(cfg.mqtt.command_template(), "hub/{device}/cmd");
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let cfg = load_file("/nonexistent/sensorhub.yaml").await;
        assert_eq!(cfg.mqtt.host, "localhost");
    }
}
