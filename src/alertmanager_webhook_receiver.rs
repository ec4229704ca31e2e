//! http boundary: webhook ingestion, liveness probe and metrics exposition
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header::CONTENT_TYPE, Response, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;

use crate::{forwarder::Forwarder, metrics::Metrics, settings::Settings, stomp::AlertPublisher};

#[derive(Debug, Deserialize, Clone)]
pub struct AlertReceiverSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl AlertReceiverSettings {
    pub fn global() -> &'static Self {
        &Settings::global().receiver
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// shared state of the http handlers
pub struct State<P> {
    pub forwarder: Forwarder<P>,
    pub metrics: Arc<Metrics>,
    pub registry: Registry,
}

/// handles one webhook push from the alertmanager
///
/// the topic path segment selects the broker destination, the raw body is
/// handed to the forwarder. decode failures and partial publish failures both
/// answer 500, the caller only learns success or failure per request.
async fn alert_receiver<P: AlertPublisher>(
    Extension(state): Extension<Arc<State<P>>>,
    Path(topic): Path<String>,
    body: Bytes,
) -> StatusCode {
    let _timer = state.metrics.forward_timer();

    let status = match state.forwarder.forward(&topic, &body).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(topic = topic.as_str(), error = %err, "failed to forward webhook");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    state.metrics.record_http_response(status);
    status
}

/// liveness probe, used from kubernetes
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "health": "ok" }))
}

async fn metrics_handler<P: AlertPublisher>(
    Extension(state): Extension<Arc<State<P>>>,
) -> Response<Body> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap()
}

pub fn router<P>(state: Arc<State<P>>) -> Router
where
    P: AlertPublisher + 'static,
{
    Router::new()
        .route("/alerts/:topic", post(alert_receiver::<P>))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler::<P>))
        .layer(Extension(state))
}

pub async fn run<P>(state: Arc<State<P>>) -> Result<()>
where
    P: AlertPublisher + 'static,
{
    let addr = AlertReceiverSettings::global().to_socket_addr();
    tracing::info!(listen = %addr, "listening for alertmanager webhooks");

    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .await
        .context("alertmanager webhook receiver crashed")?;

    Ok(())
}
