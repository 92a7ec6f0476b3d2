//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::captures::PostgresCaptureStore;
use crate::kernel::ServerKernel;
use crate::server::middleware::access_key_auth;
use crate::server::routes::{artifact_get, capture_get, capture_post, ping_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<ServerKernel>,
    pub store: Arc<PostgresCaptureStore>,
}

pub fn build_app(kernel: Arc<ServerKernel>) -> Router {
    let state = AppState {
        store: Arc::new(PostgresCaptureStore::new(kernel.db.clone())),
        kernel,
    };

    // Capture routes sit behind access-key auth; artifact retrieval and the
    // liveness probe are public.
    let authed = Router::new()
        .route("/capture", post(capture_post))
        .route("/capture/:id", get(capture_get))
        .route_layer(middleware::from_fn(access_key_auth));

    Router::new()
        .merge(authed)
        .route("/artifact/:id/:filename", get(artifact_get))
        .route("/ping", get(ping_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
