use crate::mqtt::Transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("MQTT client not connected")]
    Unavailable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub device: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn rejected(device: &str, command: &str, error: &CommandError) -> Self {
        Self {
            success: false,
            device: device.to_string(),
            command: command.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Publishes observer commands to `<base>/<device>/command`.
pub struct CommandGateway {
    transport: Arc<dyn Transport>,
    topic_template: String,
}

impl CommandGateway {
    /// `topic_template` must contain a `{device}` placeholder.
    pub fn new(transport: Arc<dyn Transport>, topic_template: impl Into<String>) -> Self {
        Self { transport, topic_template: topic_template.into() }
    }

    pub fn command_topic(&self, device: &str) -> String {
        self.topic_template.replace("{device}", device)
    }

    /// The command string is published exactly as received, not JSON-wrapped;
    /// surrounding whitespace only matters for the emptiness check. A
    /// transport-level publish failure is a `success: false` result, not an error.
    pub fn send_command(&self, device: &str, command: &str) -> Result<CommandResult, CommandError> {
        let device = device.trim();
        if device.is_empty() || command.trim().is_empty() {
            return Err(CommandError::InvalidRequest("device and command required".into()));
        }
        if !self.transport.is_connected() {
            return Err(CommandError::Unavailable);
        }

        let topic = self.command_topic(device);
        let outcome = self.transport.publish(&topic, command);
        match &outcome {
            Ok(()) => tracing::info!(device, command, topic = %topic, "command published"),
            Err(e) => tracing::error!(device, command, error = %e, "failed to publish command"),
        }
        Ok(CommandResult {
            success: outcome.is_ok(),
            device: device.to_string(),
            command: command.to_string(),
            error: outcome.err().map(|e| e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::TransportError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Transport double recording every publish.
    #[derive(Default)]
    struct RecordingTransport {
        connected: AtomicBool,
        fail_publish: AtomicBool,
        published: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn connected() -> Arc<Self> {
            let transport = Self::default();
            transport.connected.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }
    }

    impl Transport for RecordingTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(TransportError::Publish("request queue full".into()));
            }
            self.published.lock().push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    const TEMPLATE: &str = "esp-sensor-hub/{device}/command";

    #[test]
    fn test_command_topic() {
        let gateway = CommandGateway::new(RecordingTransport::connected(), TEMPLATE);
        assert_eq!(gateway.command_topic("dev1"), "esp-sensor-hub/dev1/command");
    }

    #[test]
    fn test_empty_fields_are_invalid() {
        let transport = RecordingTransport::connected();
        let gateway = CommandGateway::new(transport.clone(), TEMPLATE);
        assert!(matches!(gateway.send_command("", "restart"), Err(CommandError::InvalidRequest(_))));
        assert!(matches!(gateway.send_command("dev1", "  "), Err(CommandError::InvalidRequest(_))));
        assert!(transport.published.lock().is_empty());
    }

    #[test]
    fn test_disconnected_is_unavailable_without_publish() {
        let transport = Arc::new(RecordingTransport::default());
        let gateway = CommandGateway::new(transport.clone(), TEMPLATE);
        assert_eq!(gateway.send_command("dev1", "restart"), Err(CommandError::Unavailable));
        assert!(transport.published.lock().is_empty());
    }

    #[test]
    fn test_publishes_raw_command() {
        let transport = RecordingTransport::connected();
        let gateway = CommandGateway::new(transport.clone(), TEMPLATE);
        let result = gateway.send_command("dev1", "restart").unwrap();
        assert!(result.success);
        assert_eq!(result.device, "dev1");
        assert_eq!(result.command, "restart");
        assert_eq!(
            *transport.published.lock(),
            vec![("esp-sensor-hub/dev1/command".to_string(), "restart".to_string())]
        );
    }

    #[test]
    fn test_command_published_as_received() {
        let transport = RecordingTransport::connected();
        let gateway = CommandGateway::new(transport.clone(), TEMPLATE);
        let result = gateway.send_command(" dev1 ", "set_interval 30\n").unwrap();
        assert!(result.success);
        assert_eq!(result.device, "dev1");
        assert_eq!(result.command, "set_interval 30\n");
        assert_eq!(
            *transport.published.lock(),
            vec![("esp-sensor-hub/dev1/command".to_string(), "set_interval 30\n".to_string())]
        );
    }

    #[test]
    fn test_publish_failure_is_reported() {
        let transport = RecordingTransport::connected();
        transport.fail_publish.store(true, Ordering::SeqCst);
        let gateway = CommandGateway::new(transport.clone(), TEMPLATE);
        let result = gateway.send_command("dev1", "restart").unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
