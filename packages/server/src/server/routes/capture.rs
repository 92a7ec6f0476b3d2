//! /capture routes: submission and polling.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::common::CaptureView;
use crate::kernel::captures::{Capture, CaptureStore};
use crate::server::app::AppState;
use crate::server::middleware::AuthenticatedKey;

use super::ErrorBody;

#[derive(Debug, Deserialize)]
pub struct CreateCaptureRequest {
    pub url: Option<String>,
    pub callback_url: Option<String>,
}

type RouteResult = Result<(StatusCode, Json<CaptureView>), (StatusCode, Json<ErrorBody>)>;

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody::new(message)))
}

/// `true` only for absolute http(s) URLs with a host.
fn is_acceptable_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// [POST] /capture — create a capture request.
///
/// Requires an Access-Key header. Returns 429 when the pending queue is at
/// capacity.
pub async fn capture_post(
    Extension(state): Extension<AppState>,
    Extension(AuthenticatedKey(access_key)): Extension<AuthenticatedKey>,
    Json(body): Json<CreateCaptureRequest>,
) -> RouteResult {
    let pending = state.store.count_pending().await.map_err(|e| {
        error!(error = format!("{e:#}"), "could not count pending captures");
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not create capture request.",
        )
    })?;

    if pending >= state.kernel.config.max_pending_captures {
        return Err(reject(
            StatusCode::TOO_MANY_REQUESTS,
            "Capture server is over capacity.",
        ));
    }

    let Some(url) = body.url else {
        return Err(reject(StatusCode::BAD_REQUEST, "No URL provided."));
    };

    if !is_acceptable_url(&url) {
        return Err(reject(StatusCode::BAD_REQUEST, "Provided URL is not valid."));
    }

    if let Some(callback_url) = &body.callback_url {
        if !is_acceptable_url(callback_url) {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "Provided callback URL is not valid.",
            ));
        }
    }

    let capture = Capture::new(url, body.callback_url, access_key.id);

    state.store.insert(&capture).await.map_err(|e| {
        error!(error = format!("{e:#}"), "could not insert capture");
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not create capture request.",
        )
    })?;

    info!(capture_id = %capture.id, access_key_id = access_key.id, "capture queued");

    Ok((
        StatusCode::OK,
        Json(CaptureView::from_capture(&capture, &state.kernel.config)),
    ))
}

/// [GET] /capture/:id — poll a capture.
///
/// Requires an Access-Key header; only the submitting key may read it.
pub async fn capture_get(
    Extension(state): Extension<AppState>,
    Extension(AuthenticatedKey(access_key)): Extension<AuthenticatedKey>,
    Path(id): Path<String>,
) -> RouteResult {
    let Ok(id) = Uuid::parse_str(&id) else {
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid capture id format."));
    };

    let capture = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!(error = format!("{e:#}"), "could not load capture");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not load capture.",
            )
        })?
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "No match for given capture id."))?;

    if capture.access_key_id != access_key.id {
        return Err(reject(
            StatusCode::FORBIDDEN,
            "Access to this capture was denied.",
        ));
    }

    Ok((
        StatusCode::OK,
        Json(CaptureView::from_capture(&capture, &state.kernel.config)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_acceptable_url("https://example.com/page"));
        assert!(is_acceptable_url("http://example.com"));

        assert!(!is_acceptable_url("ftp://example.com"));
        assert!(!is_acceptable_url("javascript:alert(1)"));
        assert!(!is_acceptable_url("example.com"));
        assert!(!is_acceptable_url(""));
    }
}
