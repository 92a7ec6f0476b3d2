//! /artifact routes: regulated access to capture artifacts.
//!
//! Files are served straight from a capture's working directory. The
//! filename is restricted to the literal archive name or an attachment
//! with an allow-listed extension, so nothing else in the directory (the
//! raw JSON summary in particular) is reachable.

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::common::capture_view::{ARCHIVE_FILENAME, ATTACHMENTS_DIRNAME};
use crate::server::app::AppState;

use super::ErrorBody;

const ALLOWED_ATTACHMENT_EXTENSIONS: &[&str] = &["pem", "png", "pdf", "html", "mp4", "vtt"];

/// Attachment filenames: word characters, dots, dashes; one of the allowed
/// extensions.
fn is_valid_attachment_name(filename: &str) -> bool {
    let Some((stem, extension)) = filename.rsplit_once('.') else {
        return false;
    };

    if stem.is_empty() || !ALLOWED_ATTACHMENT_EXTENSIONS.contains(&extension) {
        return false;
    }

    filename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

/// [GET] /artifact/:id/:filename — download one artifact. No auth.
pub async fn artifact_get(
    Extension(state): Extension<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return reject(StatusCode::BAD_REQUEST, "Invalid capture id format.");
    };

    // The archive sits at the top of the working directory; everything
    // else lives under attachments/.
    let relative = if filename == ARCHIVE_FILENAME {
        filename.clone()
    } else if is_valid_attachment_name(&filename) {
        format!("{ATTACHMENTS_DIRNAME}/{filename}")
    } else {
        return reject(StatusCode::BAD_REQUEST, "Invalid filename provided.");
    };

    let full_path = state
        .kernel
        .config
        .storage_path
        .join(id.to_string())
        .join(&relative);

    let file = match tokio::fs::File::open(&full_path).await {
        Ok(file) => file,
        Err(_) => return reject(StatusCode::NOT_FOUND, "Requested file was not found."),
    };

    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();

    let body = Body::from_stream(ReaderStream::new(file));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*".to_string()),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "*".to_string()),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                "Content-Range, Content-Encoding, Content-Length".to_string(),
            ),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_name_allow_list() {
        assert!(is_valid_attachment_name("screenshot.png"));
        assert!(is_valid_attachment_name("provenance-summary.html"));
        assert!(is_valid_attachment_name("cert_1.pem"));
        assert!(is_valid_attachment_name("video.mp4"));

        assert!(!is_valid_attachment_name("archive.json"));
        assert!(!is_valid_attachment_name("archive.wacz"));
        assert!(!is_valid_attachment_name("../secrets.pem"));
        assert!(!is_valid_attachment_name("no extension"));
        assert!(!is_valid_attachment_name(".png"));
        assert!(!is_valid_attachment_name("shell.sh"));
    }
}
