//! HTTP response helpers for consistent API bodies.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// 200 with a JSON body.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// 202 with a JSON body, for work that continues in the background.
pub fn api_accepted<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::ACCEPTED, Json(data))
}
