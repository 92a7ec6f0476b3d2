//! Public representation of a capture.
//!
//! This is the only shape callers ever see: it is returned by the HTTP
//! boundary and posted to callback URLs. Internal diagnostics stay hidden
//! unless the deployment opts in via the expose flags.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::kernel::captures::{Capture, CaptureStatus};

pub const ARCHIVE_FILENAME: &str = "archive.wacz";
pub const SUMMARY_FILENAME: &str = "archive.json";
pub const ATTACHMENTS_DIRNAME: &str = "attachments";

#[derive(Debug, Clone, Serialize)]
pub struct CaptureView {
    pub id: Uuid,
    pub status: CaptureStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub url: String,
    pub callback_url: Option<String>,

    /// Polling URL, present while the capture is pending or started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow: Option<String>,

    /// Artifact download URLs, present on success. The raw JSON summary is
    /// deliberately not listed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,

    /// Playback URL derived from the first artifact, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_playback_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_logs: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl CaptureView {
    /// Shape a capture for the outside world, listing whatever artifacts
    /// are currently on disk for successful captures.
    pub fn from_capture(capture: &Capture, config: &Config) -> Self {
        let mut view = Self {
            id: capture.id,
            status: capture.status,
            created_at: capture.created_at,
            started_at: capture.started_at,
            ended_at: capture.ended_at,
            url: capture.url.clone(),
            callback_url: capture.callback_url.clone(),
            follow: None,
            artifacts: None,
            temporary_playback_url: None,
            stdout_logs: None,
            stderr_logs: None,
            summary: None,
        };

        match capture.status {
            CaptureStatus::Pending | CaptureStatus::Started => {
                view.follow = Some(format!("{}/capture/{}", config.api_domain, capture.id));
            }
            CaptureStatus::Success => {
                let storage = config.storage_path.join(capture.id.to_string());
                let artifacts: Vec<String> = list_artifacts(&storage)
                    .into_iter()
                    .map(|f| format!("{}/artifact/{}/{}", config.api_domain, capture.id, f))
                    .collect();

                if let Some(first) = artifacts.first() {
                    view.temporary_playback_url =
                        Some(format!("https://replayweb.page/?source={first}"));
                }
                view.artifacts = Some(artifacts);
            }
            CaptureStatus::Failed => {}
        }

        if capture.status.is_terminal() {
            if config.expose_tool_logs {
                view.stdout_logs = capture.stdout_logs.clone();
                view.stderr_logs = capture.stderr_logs.clone();
            }
            if config.expose_capture_summary {
                view.summary = capture.summary.clone();
            }
        }

        view
    }
}

/// Filenames of the artifacts under a capture's working directory: the
/// archive first, then everything in `attachments/`.
fn list_artifacts(storage: &Path) -> Vec<String> {
    let mut artifacts = Vec::new();

    if let Ok(entries) = fs::read_dir(storage) {
        let mut archives: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(".wacz"))
            .collect();
        archives.sort();
        artifacts.extend(archives);
    }

    if let Ok(entries) = fs::read_dir(storage.join(ATTACHMENTS_DIRNAME)) {
        let mut attachments: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        attachments.sort();
        artifacts.extend(attachments);
    }

    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn test_config(storage: &Path) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            port: 5000,
            api_domain: "http://localhost:5000".to_string(),
            storage_path: storage.to_path_buf(),
            storage_expiration_secs: 86_400,
            tool_scratch_path: storage.join("scratch"),
            max_pending_captures: 300,
            access_key_salt: "salt".to_string(),
            processes: 6,
            proxy_port_base: 9000,
            capture_timeout_fuse_secs: 45,
            expose_tool_logs: false,
            expose_capture_summary: true,
            capture_tool_command: vec!["npx".to_string(), "scoop".to_string()],
        }
    }

    fn capture_with_status(status: CaptureStatus) -> Capture {
        let mut capture = Capture::new("https://example.com", None, 1);
        capture.status = status;
        capture
    }

    #[test]
    fn test_pending_capture_gets_follow_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let capture = capture_with_status(CaptureStatus::Pending);

        let view = CaptureView::from_capture(&capture, &config);
        assert_eq!(
            view.follow,
            Some(format!("http://localhost:5000/capture/{}", capture.id))
        );
        assert!(view.artifacts.is_none());
    }

    #[test]
    fn test_success_lists_artifacts_and_playback_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let capture = capture_with_status(CaptureStatus::Success);

        let storage = dir.path().join(capture.id.to_string());
        let attachments = storage.join(ATTACHMENTS_DIRNAME);
        fs::create_dir_all(&attachments).unwrap();
        fs::write(storage.join(ARCHIVE_FILENAME), b"wacz").unwrap();
        fs::write(storage.join(SUMMARY_FILENAME), b"{}").unwrap();
        fs::write(attachments.join("screenshot.png"), b"png").unwrap();

        let view = CaptureView::from_capture(&capture, &config);
        let artifacts = view.artifacts.unwrap();

        // The archive leads, the JSON summary is excluded.
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts[0].ends_with(&format!("/artifact/{}/archive.wacz", capture.id)));
        assert!(artifacts[1].ends_with(&format!("/artifact/{}/screenshot.png", capture.id)));
        assert_eq!(
            view.temporary_playback_url,
            Some(format!("https://replayweb.page/?source={}", artifacts[0]))
        );
    }

    #[test]
    fn test_log_exposure_is_gated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let mut capture = capture_with_status(CaptureStatus::Failed);
        capture.stdout_logs = Some("out".to_string());
        capture.stderr_logs = Some("err".to_string());
        capture.summary = Some(json!({"states": []}));

        let view = CaptureView::from_capture(&capture, &config);
        assert!(view.stdout_logs.is_none());
        assert_eq!(view.summary, Some(json!({"states": []})));

        config.expose_tool_logs = true;
        config.expose_capture_summary = false;
        let view = CaptureView::from_capture(&capture, &config);
        assert_eq!(view.stdout_logs.as_deref(), Some("out"));
        assert!(view.summary.is_none());
    }

    #[test]
    fn test_pending_capture_never_exposes_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.expose_tool_logs = true;

        let mut capture = capture_with_status(CaptureStatus::Started);
        capture.stdout_logs = Some("partial".to_string());

        let view = CaptureView::from_capture(&capture, &config);
        assert!(view.stdout_logs.is_none());
    }
}
