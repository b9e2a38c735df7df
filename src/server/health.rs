//! Liveness endpoint.

use axum::http::StatusCode;

/// Returns 200 with a small face while the process is up.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "^_^\n")
}
