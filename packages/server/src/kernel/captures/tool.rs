//! Bounded adapter around the external capture tool.
//!
//! The tool is treated as an opaque subprocess: we hand it a target URL,
//! output paths and the static flag set, then wait on it under a hard
//! wall-clock budget. Everything the worker needs to know about a run is
//! in [`ToolRun`]; spawning is behind the [`CaptureTool`] trait so tests
//! can script outcomes without a real process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::CaptureToolOptions;

/// Inputs for one capture run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub url: String,
    pub archive_path: PathBuf,
    pub summary_path: PathBuf,
    pub attachments_path: PathBuf,
    pub proxy_port: u16,
}

/// Result of one capture run, timeout included.
#[derive(Debug)]
pub struct ToolRun {
    /// Exit code; `None` when the process was killed (timeout) or ended on
    /// a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The wall-clock budget expired and the process was killed.
    pub timed_out: bool,
}

/// External capture tool, invoked once per claimed capture.
#[async_trait]
pub trait CaptureTool: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation, budget: Duration) -> Result<ToolRun>;
}

/// Spawns the real capture CLI (`npx scoop` by default).
pub struct CaptureToolCli {
    command: Vec<String>,
    options: CaptureToolOptions,
}

impl CaptureToolCli {
    pub fn new(command: Vec<String>, options: CaptureToolOptions) -> Self {
        debug_assert!(!command.is_empty());
        Self { command, options }
    }

    /// Full argument vector for one invocation: positional URL, output
    /// contract flags, proxy port, then the static option set.
    fn build_args(&self, invocation: &ToolInvocation) -> Vec<String> {
        let mut args: Vec<String> = self.command[1..].to_vec();

        args.push(invocation.url.clone());
        args.push("--output".to_string());
        args.push(invocation.archive_path.display().to_string());
        args.push("--format".to_string());
        args.push("wacz".to_string());
        args.push("--json-summary-output".to_string());
        args.push(invocation.summary_path.display().to_string());
        args.push("--export-attachments-output".to_string());
        args.push(invocation.attachments_path.display().to_string());
        args.push("--proxy-port".to_string());
        args.push(invocation.proxy_port.to_string());

        args.extend(self.options.to_args());

        args
    }
}

#[async_trait]
impl CaptureTool for CaptureToolCli {
    async fn run(&self, invocation: &ToolInvocation, budget: Duration) -> Result<ToolRun> {
        let args = self.build_args(invocation);

        let mut child = Command::new(&self.command[0])
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn capture tool {:?}", self.command[0]))?;

        // Drain both pipes while waiting so the child can't block on a full
        // pipe buffer.
        let mut stdout_pipe = child.stdout.take().context("child stdout not captured")?;
        let mut stderr_pipe = child.stderr.take().context("child stderr not captured")?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let (status, timed_out) = match tokio::time::timeout(budget, child.wait()).await {
            Ok(status) => (Some(status.context("failed waiting on capture tool")?), false),
            Err(_) => {
                child.kill().await.ok();
                (None, true)
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ToolRun {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> ToolInvocation {
        ToolInvocation {
            url: "https://example.com".to_string(),
            archive_path: "/tmp/cap/archive.wacz".into(),
            summary_path: "/tmp/cap/archive.json".into(),
            attachments_path: "/tmp/cap/attachments".into(),
            proxy_port: 9001,
        }
    }

    #[test]
    fn test_args_follow_the_tool_contract() {
        let cli = CaptureToolCli::new(
            vec!["npx".to_string(), "scoop".to_string()],
            CaptureToolOptions::default(),
        );
        let args = cli.build_args(&invocation());

        // Subcommand first, then the positional URL.
        assert_eq!(args[0], "scoop");
        assert_eq!(args[1], "https://example.com");

        let output_pos = args.iter().position(|a| a == "--output").unwrap();
        assert_eq!(args[output_pos + 1], "/tmp/cap/archive.wacz");

        let format_pos = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[format_pos + 1], "wacz");

        let proxy_pos = args.iter().position(|a| a == "--proxy-port").unwrap();
        assert_eq!(args[proxy_pos + 1], "9001");

        // Static options ride along.
        assert!(args.iter().any(|a| a == "--blocklist"));
    }

    /// A stand-in "tool" that ignores the capture flags: `bash -c <script>`
    /// treats everything after the script as positional parameters.
    fn scripted(script: &str) -> CaptureToolCli {
        CaptureToolCli::new(
            vec!["bash".to_string(), "-c".to_string(), script.to_string()],
            CaptureToolOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_timeout_kills_child_and_reports_timed_out() {
        let run = scripted("sleep 5")
            .run(&invocation(), Duration::from_millis(100))
            .await
            .expect("spawn");
        assert!(run.timed_out);
        assert_eq!(run.exit_code, None);
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_captured_output() {
        let run = scripted("echo out; echo err >&2; exit 3")
            .run(&invocation(), Duration::from_secs(5))
            .await
            .expect("spawn");
        assert!(!run.timed_out);
        assert_eq!(run.exit_code, Some(3));
        assert_eq!(run.stdout.trim(), "out");
        assert_eq!(run.stderr.trim(), "err");
    }
}
