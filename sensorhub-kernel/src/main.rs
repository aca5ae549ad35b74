/**
 * SENSORHUB KERNEL - Entry point of the sensor hub admin server
 *
 * ROLE: wires config, inventory, the aggregation service and the HTTP API.
 * A broker that cannot be reached at startup is not fatal: the dashboard is
 * still served, with live aggregation disabled.
 *
 * ARCHITECTURE: MQTT → ingestion worker → device store → observers (websocket),
 * and dashboard → command gateway → MQTT.
 */

mod config;
mod gateway;
mod health;
mod http;
mod hub;
mod models;
mod mqtt;
mod reconcile;
mod roster;
mod service;
mod store;
mod topic;

use crate::config::load_config;
use crate::http::AppState;
use crate::roster::MarkdownInventory;
use crate::service::HubService;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sensorhub_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    info!(
        broker = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        base_topic = %cfg.mqtt.base_topic,
        inventory = %cfg.inventory_path,
        "starting sensor hub kernel"
    );

    let roster = Arc::new(MarkdownInventory::new(&cfg.inventory_path));
    let service = Arc::new(HubService::new(&cfg, roster));

    if let Err(e) = service.start().await {
        warn!(error = %e, "MQTT unavailable, serving without live aggregation");
    }

    let app = http::build_router(AppState { service: service.clone() });

    let listener = TcpListener::bind((cfg.http.host.as_str(), cfg.http.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cfg.http.host, cfg.http.port))?;
    info!("listening on http://{}:{}", cfg.http.host, cfg.http.port);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    service.stop();
    served
}
