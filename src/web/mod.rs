//! HTTP/JSON API
//!
//! REST surface on the main HTTP port: status, configuration read and
//! partial update, system actions, and a network scan. Errors use
//! conventional status codes with a JSON error body.

use crate::config::{ConfigStore, DeviceConfig};
use crate::console::ShutdownKind;
use crate::error::Result;
use crate::link::LinkSource;
use crate::status::StatusContext;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Callback fired after a configuration update was applied and persisted
pub type ConfigChangedHook = Arc<dyn Fn(&DeviceConfig) + Send + Sync>;

/// Shared state for the API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Status document renderer
    pub status: Arc<StatusContext>,
    /// Configuration store
    pub config: Arc<ConfigStore>,
    /// Link source for scans
    pub link: Arc<dyn LinkSource>,
    /// Shutdown intents (restart, factory reset)
    pub intents: mpsc::UnboundedSender<ShutdownKind>,
    /// Config-changed notification
    pub on_config_changed: Option<ConfigChangedHook>,
}

/// Build the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/config", get(api_config_get).post(api_config_post))
        .route("/api/system", post(api_system))
        .route("/api/scan", get(api_scan))
        .fallback(not_found)
        .with_state(state)
}

/// Serve the API on an already-bound listener
pub async fn serve(listener: TcpListener, state: ApiState) -> Result<()> {
    info!("HTTP API listening on {:?}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::AgentError::Transport(e.to_string()))
}

async fn api_status(State(state): State<ApiState>) -> Json<Value> {
    Json(state.status.api_document().await)
}

async fn api_config_get(State(state): State<ApiState>) -> Json<DeviceConfig> {
    Json(state.config.get().await)
}

async fn api_config_post(State(state): State<ApiState>, body: String) -> Response {
    let doc: Value = match serde_json::from_str(&body) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Rejected config update, invalid JSON: {}", e);
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid JSON"})))
                .into_response();
        }
    };

    state.config.apply_update(&doc).await;
    if let Err(e) = state.config.save().await {
        error!("Failed to persist config update: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to persist configuration"})),
        )
            .into_response();
    }

    if let Some(hook) = &state.on_config_changed {
        hook(&state.config.get().await);
    }
    (StatusCode::OK, Json(json!({"status": "Configuration updated"}))).into_response()
}

async fn api_system(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match params.get("action").map(String::as_str) {
        Some("restart") => {
            info!("Restart requested over HTTP");
            let _ = state.intents.send(ShutdownKind::Restart);
            (StatusCode::OK, Json(json!({"status": "Restarting..."}))).into_response()
        }
        Some("factoryReset") => {
            info!("Factory reset requested over HTTP");
            let _ = state.intents.send(ShutdownKind::FactoryReset);
            (StatusCode::OK, Json(json!({"status": "Factory reset..."}))).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid action"}))).into_response(),
    }
}

async fn api_scan(State(state): State<ApiState>) -> Json<Value> {
    let networks = state.link.scan();
    Json(json!({ "networks": networks }))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Endpoint not found"})),
    )
        .into_response()
}
