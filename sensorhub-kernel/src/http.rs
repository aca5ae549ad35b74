/**
 * HTTP API - dashboard boundary of the sensor hub
 *
 * ROUTES:
 * - /health, /system/health : liveness and kernel counters
 * - /api/devices            : inventory reconciled with live state
 * - /api/messages           : recent MQTT history, oldest first
 * - /api/command            : publish a command to one device
 * - /ws                     : live observer channel
 *
 * WEBSOCKET: every frame is JSON `{"event": ..., "data": ...}`. The first
 * frame is always `initial_state`. Observers may send
 * `{"event": "send_command", "data": {"device": ..., "command": ...}}` and get
 * the `command_result` back on the same socket.
 */

use crate::gateway::{CommandError, CommandRequest, CommandResult};
use crate::health::KernelHealth;
use crate::hub::ObserverId;
use crate::models::{DeviceState, RawMessage, ReconciledDevice};
use crate::service::HubService;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::{routing::{get, post}, Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HubService>,
}

/// Requests an observer may send over its websocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ObserverRequest {
    SendCommand(CommandRequest),
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/devices", get(get_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/messages", get(get_messages))
        .route("/api/command", post(send_command))
        .route("/ws", get(ws_upgrade))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.service.health())
}

// GET /api/devices (list)
async fn get_devices(State(app): State<AppState>) -> Json<Vec<ReconciledDevice>> {
    Json(app.service.devices())
}

// GET /api/devices/{id} (live state of one MQTT identifier)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceState>, StatusCode> {
    app.service.device(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /api/messages
async fn get_messages(State(app): State<AppState>) -> Json<Vec<RawMessage>> {
    Json(app.service.messages())
}

// POST /api/command
async fn send_command(
    State(app): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResult>) {
    match app.service.send_command(&req.device, &req.command) {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e) => {
            warn!(device = %req.device, command = %req.command, error = %e, "command rejected");
            let code = match e {
                CommandError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                CommandError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            };
            (code, Json(CommandResult::rejected(&req.device, &req.command, &e)))
        }
    }
}

// GET /ws
async fn ws_upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, app.service))
}

async fn observe(socket: WebSocket, service: Arc<HubService>) {
    let (id, mut events) = service.attach_observer();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(event = event.name(), error = %e, "failed to serialize event"),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_observer_request(&service, &id, text.as_str()),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    service.detach_observer(&id);
}

fn handle_observer_request(service: &HubService, id: &ObserverId, text: &str) {
    match serde_json::from_str::<ObserverRequest>(text) {
        Ok(ObserverRequest::SendCommand(req)) => {
            service.command_from_observer(id, &req.device, &req.command);
        }
        Err(e) => debug!(observer = %id, error = %e, "ignoring observer message"),
    }
}
