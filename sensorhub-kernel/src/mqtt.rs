/**
 * MQTT TRANSPORT - Broker session for the sensor hub
 *
 * ROLE: one persistent rumqttc session subscribed to `<base>/#`. Inbound
 * publishes are handed to the ingestion worker through a channel; commands
 * go out through `publish` at QoS 0.
 *
 * LIFECYCLE: `connect` waits for the broker ConnAck and spawns the receive
 * loop; `disconnect` tears it down and may be called any number of times.
 * The adapter never reconnects on its own: after an unsolicited disconnect
 * it reports the change to observers and stays idle.
 */

use crate::config::MqttConf;
use crate::hub::{BroadcastHub, Connectivity, HubEvent};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("MQTT client not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Outbound side of the broker session, as seen by the command gateway.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;
}

/// A publish received from the broker, stamped on arrival.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: OffsetDateTime,
}

struct Session {
    client: AsyncClient,
    receive_loop: JoinHandle<()>,
}

pub struct MqttTransport {
    conf: MqttConf,
    hub: Arc<BroadcastHub>,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(conf: MqttConf, hub: Arc<BroadcastHub>) -> Self {
        Self {
            conf,
            hub,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &str {
        &self.conf.host
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.conf.client_id, &self.conf.host, self.conf.port);
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs));
        opts.set_clean_session(true);
        if !self.conf.username.is_empty() && !self.conf.password.is_empty() {
            opts.set_credentials(&self.conf.username, &self.conf.password);
        }
        opts
    }

    /// Opens the broker session and returns the inbound message stream.
    /// A previous session, if any, is closed first.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<InboundMessage>, TransportError> {
        self.disconnect();

        let (client, mut eventloop) = AsyncClient::new(self.options(), 64);
        if let Err(e) = wait_for_connack(&mut eventloop).await {
            warn!(broker = %self.conf.host, port = self.conf.port, error = %e, "MQTT connection failed");
            self.hub.broadcast(HubEvent::ConnectivityChanged(Connectivity::now(
                false,
                &self.conf.host,
                Some(e.to_string()),
            )));
            return Err(e);
        }

        let filter = format!("{}/#", self.conf.base_topic);
        client
            .try_subscribe(filter.as_str(), QoS::AtMostOnce)
            .map_err(|e| TransportError::Connection(format!("subscribe {filter}: {e}")))?;
        info!(broker = %self.conf.host, port = self.conf.port, topic = %filter, "connected to MQTT broker");

        let (tx, rx) = mpsc::unbounded_channel();
        self.connected.store(true, Ordering::SeqCst);
        // announced before the loop runs, so a lost session is always reported after it
        self.hub.broadcast(HubEvent::ConnectivityChanged(Connectivity::now(true, &self.conf.host, None)));
        let receive_loop = tokio::spawn(receive_loop(
            eventloop,
            tx,
            self.connected.clone(),
            self.hub.clone(),
            self.conf.host.clone(),
        ));
        *self.session.lock() = Some(Session { client, receive_loop });
        Ok(rx)
    }

    /// Stops the receive loop and drops the session. Idempotent.
    pub fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Err(e) = session.client.try_disconnect() {
            debug!(error = %e, "disconnect request not queued");
        }
        session.receive_loop.abort();
        info!(broker = %self.conf.host, "disconnected from MQTT broker");
        if was_connected {
            self.hub.broadcast(HubEvent::ConnectivityChanged(Connectivity::now(false, &self.conf.host, None)));
        }
    }
}

impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.receive_loop.abort();
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(TransportError::Connection(format!("broker refused connection: {code:?}"))),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}

async fn receive_loop(
    mut eventloop: EventLoop,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    connected: Arc<AtomicBool>,
    hub: Arc<BroadcastHub>,
    broker: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                debug!(topic = %p.topic, bytes = p.payload.len(), "MQTT message received");
                let message = InboundMessage {
                    topic: p.topic,
                    payload: p.payload.to_vec(),
                    received_at: OffsetDateTime::now_utc(),
                };
                if inbound.send(message).is_err() {
                    debug!("ingestion worker gone, stopping receive loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                // disconnect() clears the flag first, so a set flag means the broker dropped us
                if connected.swap(false, Ordering::SeqCst) {
                    warn!(broker = %broker, error = %e, "lost connection to MQTT broker");
                    hub.broadcast(HubEvent::ConnectivityChanged(Connectivity::now(
                        false,
                        &broker,
                        Some(e.to_string()),
                    )));
                }
                break;
            }
        }
    }
}
