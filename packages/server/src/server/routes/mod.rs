pub mod artifact;
pub mod capture;
pub mod ping;

use serde::Serialize;

pub use artifact::artifact_get;
pub use capture::{capture_get, capture_post};
pub use ping::ping_handler;

/// Error payload shared by every route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
