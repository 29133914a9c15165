//! Read-only HTTP status surface.

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use log::{error, info};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ApiSettings,
    index::{IndexWriter, WriterStats},
    worker::{StatusHandle, SyncStatus},
};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusHandle,
    pub writer: IndexWriter,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub sync: SyncStatus,
    pub writer: WriterStats,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        sync: state.status.snapshot(),
        writer: state.writer.stats(),
    })
}

pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Start the status server. It stops when `cancellation_token` is cancelled.
pub async fn start_server(
    state: ApiState,
    settings: &ApiSettings,
    cancellation_token: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind status API on {}", settings.bind_address))?;
    info!("Status API listening on {}", settings.bind_address);

    let app = create_app(state);
    let handle = tokio::spawn(async move {
        let shutdown = async move { cancellation_token.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Status API error: {}", e);
        }
    });

    Ok(handle)
}
