//! Capture model: one row per capture request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "capture_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[default]
    Pending,
    Started,
    Success,
    Failed,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Pending => "pending",
            CaptureStatus::Started => "started",
            CaptureStatus::Success => "success",
            CaptureStatus::Failed => "failed",
        }
    }

    /// Whether the capture has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureStatus::Success | CaptureStatus::Failed)
    }
}

/// A capture job. Created pending by the submission boundary, then mutated
/// only by the single worker that claims it.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: Uuid,
    pub access_key_id: i64,
    pub url: String,
    pub callback_url: Option<String>,
    pub status: CaptureStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stdout_logs: Option<String>,
    pub stderr_logs: Option<String>,
    pub summary: Option<serde_json::Value>,
}

impl Capture {
    /// Build a new pending capture for the given owner.
    pub fn new(url: impl Into<String>, callback_url: Option<String>, access_key_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            access_key_id,
            url: url.into(),
            callback_url,
            status: CaptureStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            stdout_logs: None,
            stderr_logs: None,
            summary: None,
        }
    }
}

/// Terminal state written back by the worker when a capture run finishes.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub status: CaptureStatus,
    pub ended_at: DateTime<Utc>,
    pub stdout_logs: Option<String>,
    pub stderr_logs: Option<String>,
    /// Tool summary document; persisted only for successful captures.
    pub summary: Option<serde_json::Value>,
}

impl CaptureOutcome {
    pub fn failed() -> Self {
        Self {
            status: CaptureStatus::Failed,
            ended_at: Utc::now(),
            stdout_logs: None,
            stderr_logs: None,
            summary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_capture_is_pending() {
        let capture = Capture::new("https://example.com", None, 1);
        assert_eq!(capture.status, CaptureStatus::Pending);
        assert!(capture.started_at.is_none());
        assert!(capture.ended_at.is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CaptureStatus::Pending.is_terminal());
        assert!(!CaptureStatus::Started.is_terminal());
        assert!(CaptureStatus::Success.is_terminal());
        assert!(CaptureStatus::Failed.is_terminal());
    }
}
