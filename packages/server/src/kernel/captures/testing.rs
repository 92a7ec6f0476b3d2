//! Test doubles for the capture pipeline: an in-memory store with the same
//! conditional-claim semantics as Postgres, a scriptable capture tool, and
//! a recording notifier. Used by unit and integration tests; no database
//! or subprocess required.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::capture::{Capture, CaptureOutcome, CaptureStatus};
use super::notifier::CallbackNotifier;
use super::store::CaptureStore;
use super::tool::{CaptureTool, ToolInvocation, ToolRun};

/// In-memory capture store. `try_claim` is a compare-and-swap under one
/// mutex, which gives it the same exactly-one-winner behavior as the
/// database's conditional update.
#[derive(Default)]
pub struct InMemoryCaptureStore {
    inner: Mutex<HashMap<Uuid, Capture>>,
    transitions: Mutex<Vec<(Uuid, CaptureStatus)>>,
}

impl InMemoryCaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_captures(captures: impl IntoIterator<Item = Capture>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap();
            for capture in captures {
                inner.insert(capture.id, capture);
            }
        }
        store
    }

    pub fn get(&self, id: Uuid) -> Option<Capture> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    /// Every status transition applied through this store, in order.
    pub fn transitions(&self) -> Vec<(Uuid, CaptureStatus)> {
        self.transitions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureStore for InMemoryCaptureStore {
    async fn insert(&self, capture: &Capture) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&capture.id) {
            return Err(anyhow!("duplicate capture id {}", capture.id));
        }
        inner.insert(capture.id, capture.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Capture>> {
        Ok(self.get(id))
    }

    async fn find_oldest_pending(&self) -> Result<Option<Capture>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|c| c.status == CaptureStatus::Pending)
            .min_by_key(|c| c.created_at)
            .cloned())
    }

    async fn count_pending(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|c| c.status == CaptureStatus::Pending)
            .count() as i64)
    }

    async fn try_claim(&self, id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&id) {
            Some(capture) if capture.status == CaptureStatus::Pending => {
                capture.status = CaptureStatus::Started;
                self.transitions
                    .lock()
                    .unwrap()
                    .push((id, CaptureStatus::Started));
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(capture) = inner.get_mut(&id) {
            if capture.status == CaptureStatus::Started {
                capture.started_at = Some(at);
            }
        }
        Ok(())
    }

    async fn finish(&self, id: Uuid, outcome: &CaptureOutcome) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let capture = inner
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no capture {id}"))?;

        capture.status = outcome.status;
        capture.ended_at = Some(outcome.ended_at);
        if outcome.stdout_logs.is_some() {
            capture.stdout_logs = outcome.stdout_logs.clone();
        }
        if outcome.stderr_logs.is_some() {
            capture.stderr_logs = outcome.stderr_logs.clone();
        }
        if outcome.summary.is_some() {
            capture.summary = outcome.summary.clone();
        }
        self.transitions
            .lock()
            .unwrap()
            .push((id, outcome.status));
        Ok(())
    }
}

type ToolScript = dyn Fn(&ToolInvocation) -> Result<ToolRun> + Send + Sync;

/// Capture tool whose behavior is a closure over the invocation. The
/// closure may write real files into the invocation's paths so that
/// validation sees them.
pub struct ScriptedCaptureTool {
    script: Box<ToolScript>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedCaptureTool {
    pub fn new(script: impl Fn(&ToolInvocation) -> Result<ToolRun> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Tool that produces a complete, valid set of artifacts.
    pub fn succeeding() -> Self {
        Self::new(|invocation| {
            std::fs::write(&invocation.archive_path, b"wacz")?;
            std::fs::write(
                invocation.attachments_path.join("screenshot.png"),
                b"png",
            )?;
            std::fs::write(
                &invocation.summary_path,
                serde_json::to_vec(&serde_json::json!({
                    "attachments": {"screenshot": "screenshot.png"}
                }))?,
            )?;
            Ok(ToolRun {
                exit_code: Some(0),
                stdout: "captured".to_string(),
                stderr: String::new(),
                timed_out: false,
            })
        })
    }

    /// Tool that exits non-zero without producing anything.
    pub fn failing(exit_code: i32) -> Self {
        Self::new(move |_| {
            Ok(ToolRun {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: "boom".to_string(),
                timed_out: false,
            })
        })
    }

    /// Tool whose wall-clock budget always expires.
    pub fn timing_out() -> Self {
        Self::new(|_| {
            Ok(ToolRun {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            })
        })
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureTool for ScriptedCaptureTool {
    async fn run(&self, invocation: &ToolInvocation, _budget: Duration) -> Result<ToolRun> {
        self.invocations.lock().unwrap().push(invocation.clone());
        (self.script)(invocation)
    }
}

/// Notifier that records every capture it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<Capture>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Vec<Capture> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, capture: &Capture) {
        self.notified.lock().unwrap().push(capture.clone());
    }
}
