//! HTTP route handlers.
//!
//! All handlers are thin - they read from or delegate to the discovery engine.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::api::response::{api_accepted, api_success};
use crate::api::AppState;
use crate::error::{ChirpError, ChirpResult};
use crate::events::SsdpEvent;
use crate::protocol_constants::{APP_NAME, ROOT_DESCRIPTION_PATH, SERVICE_ID, ST_ALL};
use crate::ssdp::render_root_description;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct SearchRequest {
    st: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/upnp/devices", get(list_devices))
        .route("/api/upnp/devices/{identity}", get(get_device))
        .route("/api/upnp/search", post(trigger_search))
        .route("/api/upnp/events", get(event_stream))
        .route(ROOT_DESCRIPTION_PATH, get(root_description))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "app": APP_NAME,
        "uuid": state.engine.uuid(),
        "running": state.engine.is_running(),
        "devices": state.engine.device_count(),
    }))
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "devices": state.engine.devices() }))
}

async fn get_device(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ChirpResult<impl IntoResponse> {
    let device = state
        .engine
        .device(&identity)
        .ok_or(ChirpError::DeviceNotFound(identity))?;
    Ok(api_success(device))
}

/// POST /api/upnp/search
///
/// Starts an M-SEARCH and returns immediately. Answers show up in the device
/// list and on the event stream.
async fn trigger_search(
    State(state): State<AppState>,
    body: Option<Json<SearchRequest>>,
) -> ChirpResult<impl IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let st = request.st.unwrap_or_else(|| ST_ALL.to_string());
    if st.trim().is_empty() {
        return Err(ChirpError::InvalidRequest("st must not be empty".into()));
    }
    if !state.engine.is_running() {
        return Err(ChirpError::Discovery("discovery engine is not running".into()));
    }

    state.engine.search(st.clone());
    Ok(api_accepted(json!({
        "st": st,
        "searchWindowSecs": state.config.search_window_secs,
    })))
}

/// GET /api/upnp/events
///
/// Server-Sent Events stream of `announce` and `bye` events.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => to_sse_event(&event).map(Ok),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log::warn!("[API] Event stream client lagged, skipped {} event(s)", skipped);
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &SsdpEvent) -> Option<Event> {
    let name = if event.is_announce() { "announce" } else { "bye" };
    Event::default()
        .event(name)
        .json_data(event)
        .map_err(|e| log::warn!("[API] Failed to encode event: {}", e))
        .ok()
}

/// GET /rootDesc.xml
async fn root_description(State(state): State<AppState>) -> Response {
    let xml = render_root_description(&state.local_device());
    ([(header::CONTENT_TYPE, "text/xml; charset=\"utf-8\"")], xml).into_response()
}
