//! Process supervisor: owns the capture worker population.
//!
//! Workers are separate OS processes (the `worker` subcommand of this same
//! binary), each pinned to its own proxy port. The supervisor restarts
//! whatever exits and forwards SIGINT for a graceful stop.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::Config;

struct SupervisedWorker {
    index: u16,
    proxy_port: u16,
    child: Child,
}

/// Launch one worker child on the given proxy port, inheriting stdio so
/// worker logs interleave with the supervisor's.
async fn spawn_worker(index: u16, proxy_port: u16) -> Result<SupervisedWorker> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;

    let child = Command::new(exe)
        .arg("worker")
        .arg("--proxy-port")
        .arg(proxy_port.to_string())
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn worker #{index}"))?;

    info!(worker = index, proxy_port, "worker launched");

    Ok(SupervisedWorker {
        index,
        proxy_port,
        child,
    })
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
    }
}

/// Proxy ports for the worker population, assigned sequentially from the
/// configured base. The whole range must fit in the valid port space.
fn worker_proxy_ports(config: &Config) -> Result<Vec<u16>> {
    let last = config.proxy_port_base as u32 + config.processes.saturating_sub(1) as u32;
    if last > u16::MAX as u32 {
        bail!(
            "{} workers starting at proxy port {} would run past port {}",
            config.processes,
            config.proxy_port_base,
            u16::MAX
        );
    }

    Ok((0..config.processes)
        .map(|index| config.proxy_port_base + index)
        .collect())
}

/// Run `config.processes` workers until ctrl-c, restarting any that exit.
pub async fn run_supervisor(config: &Config) -> Result<()> {
    let ports = worker_proxy_ports(config)?;
    let mut workers = Vec::with_capacity(ports.len());

    for (index, proxy_port) in ports.into_iter().enumerate() {
        // Staggered launch to avoid startup contention on the queue.
        tokio::time::sleep(Duration::from_secs(1)).await;
        workers.push(spawn_worker(index as u16, proxy_port).await?);
    }

    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    liveness.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = liveness.tick() => {
                for worker in workers.iter_mut() {
                    let exit = worker.child.try_wait().context("failed to poll worker")?;

                    if let Some(status) = exit {
                        if status.success() {
                            info!(worker = worker.index, "worker stopped - rebooting");
                        } else {
                            warn!(worker = worker.index, %status, "worker crashed - rebooting");
                        }
                        *worker = spawn_worker(worker.index, worker.proxy_port).await?;
                    }
                }
            }
        }
    }

    info!("interrupt received - stopping workers");

    for worker in workers.iter_mut() {
        #[cfg(unix)]
        interrupt(&worker.child);
        #[cfg(not(unix))]
        worker.child.start_kill().ok();

        let status = worker.child.wait().await.context("failed waiting on worker")?;
        info!(worker = worker.index, %status, "worker exited");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(proxy_port_base: u16, processes: u16) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            port: 5000,
            api_domain: "http://localhost:5000".to_string(),
            storage_path: "./storage".into(),
            storage_expiration_secs: 86_400,
            tool_scratch_path: "./tmp".into(),
            max_pending_captures: 300,
            access_key_salt: "salt".to_string(),
            processes,
            proxy_port_base,
            capture_timeout_fuse_secs: 45,
            expose_tool_logs: false,
            expose_capture_summary: true,
            capture_tool_command: vec!["npx".to_string(), "scoop".to_string()],
        }
    }

    #[test]
    fn test_proxy_ports_are_sequential_from_base() {
        let ports = worker_proxy_ports(&config(9000, 3)).unwrap();
        assert_eq!(ports, vec![9000, 9001, 9002]);
    }

    #[test]
    fn test_port_range_past_u16_max_is_rejected() {
        assert!(worker_proxy_ports(&config(65530, 10)).is_err());

        // The very top of the range is still usable.
        assert_eq!(
            worker_proxy_ports(&config(65535, 1)).unwrap(),
            vec![65535]
        );
    }
}
