//! Access-key authentication middleware.
//!
//! Requests present a plaintext key in the `Access-Key` header; we hash it
//! with the deployment salt and look the digest up among active keys. On a
//! match the key row rides along in request extensions; otherwise the
//! request is rejected here with a 401.

use axum::{
    extract::{Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use crate::kernel::access_keys::AccessKey;
use crate::server::app::AppState;
use crate::server::routes::ErrorBody;

/// The authenticated caller, available to handlers behind this middleware.
#[derive(Clone, Debug)]
pub struct AuthenticatedKey(pub AccessKey);

pub async fn access_key_auth(
    Extension(state): Extension<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("access-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let Some(presented) = presented else {
        return unauthorized();
    };

    let digest = AccessKey::digest(&state.kernel.config.access_key_salt, &presented);

    match AccessKey::find_active_by_digest(&state.kernel.db, &digest).await {
        Ok(Some(access_key)) => {
            debug!(access_key_id = access_key.id, "authenticated");
            request.extensions_mut().insert(AuthenticatedKey(access_key));
            next.run(request).await
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "access key lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("Could not verify access key.")),
            )
                .into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody::new("A valid Access-Key header is required.")),
    )
        .into_response()
}
