use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use gproxy_bridge::BrowserStatus;
use gproxy_common::{RuntimeFlagsPatch, RuntimeFlagsSnapshot};
use gproxy_core::{AppState, RequestHandler};
use gproxy_identity::CursorState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub browser_connected: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let browser_connected = state.bridge.status().await == BrowserStatus::Ready;
    Json(HealthResponse {
        ok: true,
        browser_connected,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SwitchRequest {
    pub index: Option<u32>,
}

pub async fn switch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: SwitchRequest = if body.is_empty() {
        SwitchRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => return (StatusCode::BAD_REQUEST, "invalid switch request").into_response(),
        }
    };

    let handler = RequestHandler::new(state);
    let result = match request.index {
        Some(index) => handler.switch_to(index).await,
        None => handler.switch_to_next().await,
    };

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (err.status(), err.to_string()).into_response(),
    }
}

pub async fn get_flags(State(state): State<Arc<AppState>>) -> Json<RuntimeFlagsSnapshot> {
    Json(state.flags.snapshot())
}

pub async fn set_flags(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<RuntimeFlagsPatch>,
) -> Json<RuntimeFlagsSnapshot> {
    state.flags.apply(patch);
    Json(state.flags.snapshot())
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_index: Option<u32>,
    pub switching: bool,
    pub usage_count: u32,
    pub failure_count: u32,
    pub valid_indices: Vec<u32>,
    pub initial_indices: Vec<u32>,
    pub browser_status: &'static str,
    /// Free-text display summary only; the reproduced leading `+` in front of
    /// the usage count is a display-layer quirk from the original status
    /// page, not a parsing contract. Structured fields above are unaffected.
    pub summary: String,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let registry = state.identities.load();
    let cursor_state = state.cursor.state().await;
    let active_index = match cursor_state {
        CursorState::Idle => None,
        CursorState::Active(index) => Some(index),
        CursorState::Switching { to, .. } => Some(to),
    };
    let switching = matches!(cursor_state, CursorState::Switching { .. });
    let usage_count = state.cursor.usage_count();
    let failure_count = state.cursor.failure_count();
    let browser_status = match state.bridge.status().await {
        BrowserStatus::Down => "down",
        BrowserStatus::Launched => "launched",
        BrowserStatus::Ready => "ready",
        BrowserStatus::Restarting => "restarting",
    };

    Json(StatusResponse {
        active_index,
        switching,
        usage_count,
        failure_count,
        valid_indices: registry.valid_indices(),
        initial_indices: registry.initial_indices().to_vec(),
        browser_status,
        summary: format!("uses +{usage_count} failures {failure_count}"),
    })
}

/// Serves the storage-state document for one identity index so the stub page
/// can fetch and apply it client-side before opening the duplex socket,
/// rather than the bridge materializing a Chrome profile directory itself.
pub async fn identity_document(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Response {
    let registry = state.identities.load();
    match registry.get(index) {
        Some(entry) => Json(entry.document.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown identity index").into_response(),
    }
}
