//! Best-effort webhook delivery of final capture state.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::common::capture_view::CaptureView;
use crate::config::Config;
use crate::kernel::captures::Capture;

/// Delivers the public representation of a finished capture to its callback
/// URL. One attempt, short timeout, failure is logged and nothing more —
/// delivery never changes job state.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, capture: &Capture);
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    config: Config,
}

impl WebhookNotifier {
    const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(client: reqwest::Client, config: Config) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl CallbackNotifier for WebhookNotifier {
    async fn notify(&self, capture: &Capture) {
        let Some(callback_url) = capture.callback_url.as_deref() else {
            return;
        };

        info!(capture_id = %capture.id, callback_url, "delivering callback");

        let view = CaptureView::from_capture(capture, &self.config);
        let result = self
            .client
            .post(callback_url)
            .timeout(Self::DELIVERY_TIMEOUT)
            .json(&view)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    capture_id = %capture.id,
                    callback_url,
                    status = %response.status(),
                    "callback rejected by receiver"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(capture_id = %capture.id, callback_url, error = %e, "callback delivery failed");
            }
        }
    }
}
