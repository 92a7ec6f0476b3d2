//! Capture worker: claims pending captures and supervises the capture tool.
//!
//! One worker is one OS process on one proxy port. The loop is:
//! poll → claim → prepare working directory → run tool → validate →
//! finalize → callback. Coordination with sibling workers happens only
//! through the store's conditional-update claim; there are no locks.
//!
//! Failure policy is deliberately asymmetric: capture-level failures
//! (timeouts, bad exit codes, missing artifacts) mark the capture failed
//! and the loop keeps going, while unexpected faults with a capture in
//! hand mark it failed and then stop the worker — a crashed-and-restarted
//! worker is preferable to one silently corrupting job after job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::capture_view::{ARCHIVE_FILENAME, ATTACHMENTS_DIRNAME, SUMMARY_FILENAME};
use crate::config::{CaptureToolOptions, Config};

use super::capture::{CaptureOutcome, CaptureStatus};
use super::notifier::CallbackNotifier;
use super::store::CaptureStore;
use super::tool::{CaptureTool, ToolInvocation};
use super::validate::validate_run;

/// Per-process worker settings.
#[derive(Debug, Clone)]
pub struct CaptureWorkerConfig {
    /// Proxy port the capture tool binds during a run; must be distinct
    /// across concurrently running workers.
    pub proxy_port: u16,
    /// Process one capture (or one empty cycle) and stop.
    pub single_run: bool,
    /// Base sleep between empty poll cycles.
    pub poll_interval: Duration,
    /// Random extra sleep, desynchronizing competing workers.
    pub poll_jitter: Duration,
}

impl CaptureWorkerConfig {
    pub fn new(proxy_port: u16, single_run: bool) -> Self {
        Self {
            proxy_port,
            single_run,
            poll_interval: Duration::from_millis(500),
            poll_jitter: Duration::from_millis(1000),
        }
    }

    fn jittered_sleep(&self) -> Duration {
        self.poll_interval + Duration::from_millis(fastrand::u64(..=self.poll_jitter.as_millis() as u64))
    }
}

/// How one claimed capture ended, from the worker's point of view.
enum ClaimedEnd {
    /// Terminal state written; loop may continue.
    Completed,
    /// Operator interrupt arrived mid-capture; capture failed, exit cleanly.
    Interrupted,
    /// Unexpected fault; capture failed (best effort), worker must stop.
    Fatal(anyhow::Error),
}

pub struct CaptureWorker {
    store: Arc<dyn CaptureStore>,
    tool: Arc<dyn CaptureTool>,
    notifier: Arc<dyn CallbackNotifier>,
    config: Config,
    tool_options: CaptureToolOptions,
    worker_config: CaptureWorkerConfig,
}

impl CaptureWorker {
    pub fn new(
        store: Arc<dyn CaptureStore>,
        tool: Arc<dyn CaptureTool>,
        notifier: Arc<dyn CallbackNotifier>,
        config: Config,
        tool_options: CaptureToolOptions,
        worker_config: CaptureWorkerConfig,
    ) -> Self {
        Self {
            store,
            tool,
            notifier,
            config,
            tool_options,
            worker_config,
        }
    }

    /// Run the worker loop until interrupted, fatally faulted, or (in
    /// single-run mode) one cycle has been processed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            proxy_port = self.worker_config.proxy_port,
            single_run = self.worker_config.single_run,
            "capture worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let candidate = self.store.find_oldest_pending().await?;

            let Some(candidate) = candidate else {
                if self.worker_config.single_run {
                    break;
                }
                self.sleep_until_next_tick(&shutdown).await;
                continue;
            };

            // Probe the proxy port before claiming: a busy port means a
            // previous run (or another program) still holds it, and a
            // claim now would only burn the capture.
            if self.proxy_port_is_busy().await {
                warn!(
                    proxy_port = self.worker_config.proxy_port,
                    "proxy port already in use - skipping cycle"
                );
                if self.worker_config.single_run {
                    break;
                }
                self.sleep_until_next_tick(&shutdown).await;
                continue;
            }

            let claimed = self.store.try_claim(candidate.id).await?;
            if claimed == 0 {
                // Race lost to a sibling worker; benign, poll again.
                info!(capture_id = %candidate.id, "already claimed by another worker");
                continue;
            }

            // Exclusive ownership from here on. Everything that can go
            // wrong with a claimed capture goes through run_claimed, so
            // the row always reaches a terminal state.
            let end = self.run_claimed(candidate.id, &shutdown).await;

            // Whatever happened above, a claimed capture gets its callback.
            self.deliver_callback(candidate.id).await;

            match end {
                ClaimedEnd::Completed => {
                    if self.worker_config.single_run {
                        break;
                    }
                }
                ClaimedEnd::Interrupted => break,
                ClaimedEnd::Fatal(e) => return Err(e),
            }
        }

        info!(proxy_port = self.worker_config.proxy_port, "capture worker stopped");
        Ok(())
    }

    /// Everything between a successful claim and the callback step.
    async fn run_claimed(&self, capture_id: Uuid, shutdown: &CancellationToken) -> ClaimedEnd {
        match self.process_capture(capture_id, shutdown).await {
            Ok(end) => end,
            Err(e) => {
                error!(
                    capture_id = %capture_id,
                    error = format!("{e:#}"),
                    "unexpected fault while processing capture - stopping worker"
                );
                if let Err(mark_err) = self.store.finish(capture_id, &CaptureOutcome::failed()).await
                {
                    error!(
                        capture_id = %capture_id,
                        error = format!("{mark_err:#}"),
                        "failed to mark capture as failed"
                    );
                }
                ClaimedEnd::Fatal(e)
            }
        }
    }

    async fn process_capture(
        &self,
        capture_id: Uuid,
        shutdown: &CancellationToken,
    ) -> Result<ClaimedEnd> {
        // Re-read the row for a consistent post-claim snapshot.
        let capture = self
            .store
            .find_by_id(capture_id)
            .await?
            .ok_or_else(|| anyhow!("claimed capture {capture_id} vanished"))?;

        let started_at = Utc::now();
        self.store.mark_started(capture.id, started_at).await?;
        info!(capture_id = %capture.id, url = %capture.url, "marked as started");

        // Per-capture working directory. A pre-existing directory means an
        // id collision or a leftover from a broken run: fatal for this job.
        let storage = self.config.storage_path.join(capture.id.to_string());
        tokio::fs::create_dir_all(&self.config.storage_path)
            .await
            .context("failed to create storage root")?;
        tokio::fs::create_dir(&storage)
            .await
            .with_context(|| format!("working directory {} already exists", storage.display()))?;
        let attachments = storage.join(ATTACHMENTS_DIRNAME);
        tokio::fs::create_dir(&attachments)
            .await
            .context("failed to create attachments directory")?;
        info!(capture_id = %capture.id, storage = %storage.display(), "working directory ready");

        let invocation = ToolInvocation {
            url: capture.url.clone(),
            archive_path: storage.join(ARCHIVE_FILENAME),
            summary_path: storage.join(SUMMARY_FILENAME),
            attachments_path: attachments,
            proxy_port: self.worker_config.proxy_port,
        };
        let budget = self.config.capture_wall_clock_budget(&self.tool_options);

        let run = tokio::select! {
            run = self.tool.run(&invocation, budget) => run?,
            _ = shutdown.cancelled() => {
                warn!(capture_id = %capture.id, "interrupted mid-capture");
                self.store.finish(capture.id, &CaptureOutcome::failed()).await?;
                return Ok(ClaimedEnd::Interrupted);
            }
        };

        let mut outcome = CaptureOutcome {
            status: CaptureStatus::Failed,
            ended_at: Utc::now(),
            stdout_logs: Some(run.stdout.clone()),
            stderr_logs: Some(run.stderr.clone()),
            summary: None,
        };

        if run.timed_out {
            warn!(capture_id = %capture.id, "failed (timeout violation)");
        } else {
            match validate_run(
                &run,
                &invocation.archive_path,
                &invocation.summary_path,
                &invocation.attachments_path,
            ) {
                Ok(summary) => {
                    info!(capture_id = %capture.id, "success");
                    outcome.status = CaptureStatus::Success;
                    outcome.summary = Some(summary);
                }
                Err(reason) => {
                    warn!(capture_id = %capture.id, reason = %reason, "failed");
                }
            }
        }

        self.store.finish(capture.id, &outcome).await?;
        Ok(ClaimedEnd::Completed)
    }

    /// Re-read the finished capture and hand it to the notifier. Errors
    /// here are logged only; callback delivery never affects job state.
    async fn deliver_callback(&self, capture_id: Uuid) {
        match self.store.find_by_id(capture_id).await {
            Ok(Some(capture)) => self.notifier.notify(&capture).await,
            Ok(None) => {
                error!(capture_id = %capture_id, "capture missing at callback time")
            }
            Err(e) => {
                error!(capture_id = %capture_id, error = format!("{e:#}"), "could not reload capture for callback")
            }
        }
    }

    /// True when something already accepts connections on the worker's
    /// proxy port.
    async fn proxy_port_is_busy(&self) -> bool {
        let address = ("127.0.0.1", self.worker_config.proxy_port);
        matches!(
            tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(address)).await,
            Ok(Ok(_))
        )
    }

    async fn sleep_until_next_tick(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.worker_config.jittered_sleep()) => {}
        }
    }
}
