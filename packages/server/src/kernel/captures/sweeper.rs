//! Retention sweeper: deletes expired capture working directories.
//!
//! Two roots are swept: our own storage directory (UUID-named children
//! only) and the capture tool's scratch directory, which is known to leak
//! temporary folders when captures die hard. Expiry is mtime-based; the
//! retention window is expected to be much longer than any plausible
//! capture, so a directory past the window cannot belong to a live run.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
}

/// One full sweep over both roots. Safe to run repeatedly and concurrently
/// with workers.
pub async fn sweep(config: &Config) -> Result<SweepReport> {
    let window = Duration::from_secs(config.storage_expiration_secs);
    let mut report = SweepReport::default();

    sweep_directory(&config.storage_path, window, true, &mut report).await?;
    sweep_directory(&config.tool_scratch_path, window, false, &mut report).await?;

    Ok(report)
}

/// Delete expired immediate child directories of `root`. With
/// `uuid_names_only`, children whose name is not a canonical UUID are left
/// alone — the storage root may hold unrelated files.
async fn sweep_directory(
    root: &Path,
    window: Duration,
    uuid_names_only: bool,
    report: &mut SweepReport,
) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        // A root that does not exist yet has nothing to sweep.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", root.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            // Raced with a concurrent deletion; skip.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("cannot stat {}", path.display())),
        };

        if !metadata.is_dir() {
            continue;
        }

        if uuid_names_only && !has_canonical_uuid_name(&path) {
            continue;
        }

        let modified = metadata
            .modified()
            .with_context(|| format!("no mtime for {}", path.display()))?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        if age >= window {
            info!(path = %path.display(), age_secs = age.as_secs(), "expired - deleting");
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => report.deleted.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("cannot delete {}", path.display()))
                }
            }
        }
    }

    Ok(())
}

/// `true` for names like `1f0b7e6e-6f9f-4e52-8a6e-1c9a4dd34c12` — the only
/// shape capture working directories ever have.
fn has_canonical_uuid_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| Uuid::try_parse(name).ok().map(|id| id.to_string() == name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(storage: &Path, scratch: &Path, expiration_secs: u64) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            port: 5000,
            api_domain: "http://localhost:5000".to_string(),
            storage_path: storage.to_path_buf(),
            storage_expiration_secs: expiration_secs,
            tool_scratch_path: scratch.to_path_buf(),
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

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_uuid_directories() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let expired = storage.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&expired).unwrap();
        fs::write(expired.join("archive.wacz"), b"wacz").unwrap();

        let unrelated = storage.path().join("not-a-capture");
        fs::create_dir(&unrelated).unwrap();

        let plain_file = storage.path().join("README");
        fs::write(&plain_file, b"hello").unwrap();

        // Zero-second window: everything eligible is already expired.
        let config = test_config(storage.path(), scratch.path(), 0);
        let report = sweep(&config).await.unwrap();

        assert_eq!(report.deleted, vec![expired.clone()]);
        assert!(!expired.exists());
        assert!(unrelated.exists());
        assert!(plain_file.exists());
    }

    #[tokio::test]
    async fn test_fresh_directories_survive() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let fresh = storage.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&fresh).unwrap();

        let config = test_config(storage.path(), scratch.path(), 3600);
        let report = sweep(&config).await.unwrap();

        assert!(report.deleted.is_empty());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_scratch_directory_is_swept_regardless_of_name() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let leak = scratch.path().join("tmp-xyz");
        fs::create_dir(&leak).unwrap();

        let config = test_config(storage.path(), scratch.path(), 0);
        let report = sweep(&config).await.unwrap();

        assert_eq!(report.deleted, vec![leak.clone()]);
        assert!(!leak.exists());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent_and_tolerates_missing_roots() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let expired = storage.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&expired).unwrap();

        let config = test_config(storage.path(), scratch.path(), 0);
        let first = sweep(&config).await.unwrap();
        assert_eq!(first.deleted.len(), 1);

        let second = sweep(&config).await.unwrap();
        assert!(second.deleted.is_empty());

        // Roots that never existed are fine too.
        let config = test_config(
            &storage.path().join("missing"),
            &scratch.path().join("missing"),
            0,
        );
        assert!(sweep(&config).await.unwrap().deleted.is_empty());
    }
}
