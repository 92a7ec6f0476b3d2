//! Post-run artifact validation.
//!
//! A run only counts as a success once every artifact the tool claims to
//! have produced is actually on disk. Checks run in a fixed order and the
//! first blocking failure becomes the recorded reason; the attachment
//! stage, once reached, enumerates every missing file so the diagnostics
//! are complete.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::tool::ToolRun;

#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("exit code {0}")]
    NonZeroExit(i32),

    #[error("terminated by signal")]
    TerminatedBySignal,

    #[error("{0} not found")]
    ArchiveMissing(PathBuf),

    #[error("{0} not found")]
    SummaryMissing(PathBuf),

    #[error("summary is not valid JSON: {0}")]
    SummaryUnreadable(String),

    #[error("missing attachments: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    AttachmentsMissing(Vec<PathBuf>),
}

/// Validate one finished (non-timed-out) run. Returns the parsed summary
/// document on success.
pub fn validate_run(
    run: &ToolRun,
    archive_path: &Path,
    summary_path: &Path,
    attachments_path: &Path,
) -> Result<serde_json::Value, ValidationFailure> {
    match run.exit_code {
        Some(0) => {}
        Some(code) => return Err(ValidationFailure::NonZeroExit(code)),
        None => return Err(ValidationFailure::TerminatedBySignal),
    }

    if !archive_path.exists() {
        return Err(ValidationFailure::ArchiveMissing(archive_path.to_path_buf()));
    }

    if !summary_path.exists() {
        return Err(ValidationFailure::SummaryMissing(summary_path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(summary_path)
        .map_err(|e| ValidationFailure::SummaryUnreadable(e.to_string()))?;
    let summary: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| ValidationFailure::SummaryUnreadable(e.to_string()))?;

    let missing = missing_attachments(&summary, attachments_path);
    if !missing.is_empty() {
        return Err(ValidationFailure::AttachmentsMissing(missing));
    }

    Ok(summary)
}

/// Every attachment filename the summary references but the attachments
/// directory does not contain. List-valued categories (e.g. certificates)
/// are flattened.
fn missing_attachments(summary: &serde_json::Value, attachments_path: &Path) -> Vec<PathBuf> {
    let mut filenames: Vec<&str> = Vec::new();

    if let Some(attachments) = summary.get("attachments").and_then(|a| a.as_object()) {
        for value in attachments.values() {
            match value {
                serde_json::Value::Array(items) => {
                    filenames.extend(items.iter().filter_map(|i| i.as_str()));
                }
                serde_json::Value::String(name) => filenames.push(name),
                _ => {}
            }
        }
    }

    filenames
        .into_iter()
        .map(|name| attachments_path.join(name))
        .filter(|path| !path.exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn ok_run() -> ToolRun {
        ToolRun {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    fn write_summary(dir: &Path, summary: &serde_json::Value) -> PathBuf {
        let path = dir.join("archive.json");
        fs::write(&path, serde_json::to_vec(summary).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_nonzero_exit_masks_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let run = ToolRun { exit_code: Some(7), ..ok_run() };

        // Neither output file exists, but the exit code is the reason.
        let err = validate_run(
            &run,
            &dir.path().join("archive.wacz"),
            &dir.path().join("archive.json"),
            &dir.path().join("attachments"),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationFailure::NonZeroExit(7)));
    }

    #[test]
    fn test_missing_archive_beats_missing_summary() {
        let dir = tempfile::tempdir().unwrap();

        let err = validate_run(
            &ok_run(),
            &dir.path().join("archive.wacz"),
            &dir.path().join("archive.json"),
            &dir.path().join("attachments"),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationFailure::ArchiveMissing(_)));
    }

    #[test]
    fn test_unparseable_summary() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.wacz");
        fs::write(&archive, b"wacz").unwrap();
        let summary = dir.path().join("archive.json");
        fs::write(&summary, b"not-json").unwrap();

        let err = validate_run(&ok_run(), &archive, &summary, &dir.path().join("attachments"))
            .unwrap_err();
        assert!(matches!(err, ValidationFailure::SummaryUnreadable(_)));
    }

    #[test]
    fn test_all_missing_attachments_are_enumerated() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.wacz");
        fs::write(&archive, b"wacz").unwrap();
        let attachments = dir.path().join("attachments");
        fs::create_dir(&attachments).unwrap();
        fs::write(attachments.join("screenshot.png"), b"png").unwrap();

        let summary = write_summary(
            dir.path(),
            &json!({
                "attachments": {
                    "screenshot": "screenshot.png",
                    "video": "video.mp4",
                    "certificates": ["a.pem", "b.pem"],
                }
            }),
        );

        let err =
            validate_run(&ok_run(), &archive, &summary, &attachments).unwrap_err();
        match err {
            ValidationFailure::AttachmentsMissing(missing) => {
                assert_eq!(missing.len(), 3);
                let names: Vec<String> = missing
                    .iter()
                    .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                    .collect();
                assert!(names.contains(&"video.mp4".to_string()));
                assert!(names.contains(&"a.pem".to_string()));
                assert!(names.contains(&"b.pem".to_string()));
            }
            other => panic!("expected AttachmentsMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_success_returns_parsed_summary() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.wacz");
        fs::write(&archive, b"wacz").unwrap();
        let attachments = dir.path().join("attachments");
        fs::create_dir(&attachments).unwrap();
        fs::write(attachments.join("screenshot.png"), b"png").unwrap();

        let summary_doc = json!({"attachments": {"screenshot": "screenshot.png"}});
        let summary = write_summary(dir.path(), &summary_doc);

        let parsed = validate_run(&ok_run(), &archive, &summary, &attachments).unwrap();
        assert_eq!(parsed, summary_doc);
    }
}
