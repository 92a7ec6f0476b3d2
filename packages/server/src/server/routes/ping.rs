use axum::http::StatusCode;

/// Liveness probe, no auth.
pub async fn ping_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "pong")
}
