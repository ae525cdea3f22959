use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::os::OperatingSystemImage;
use crate::patch::PatchOutcome;

const REPORT_FILENAME: &str = "patch-report.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub name: String,
    pub status: String,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub image: String,
    pub os: String,
    pub status: String,
    pub created_at_utc: String,
    pub patches: Vec<PatchRecord>,
    /// Errors raised outside any single patch, e.g. a failed image lock.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PatchReport {
    pub fn new(image: &OperatingSystemImage, outcomes: &[PatchOutcome], errors: &[anyhow::Error]) -> Self {
        let patches: Vec<PatchRecord> = outcomes
            .iter()
            .map(|outcome| PatchRecord {
                name: outcome.name.clone(),
                status: status(outcome.is_success()).to_string(),
                started_at_utc: timestamp(outcome.started),
                finished_at_utc: timestamp(outcome.finished),
                errors: outcome.errors.iter().map(|e| format!("{:#}", e)).collect(),
            })
            .collect();
        let success = errors.is_empty() && outcomes.iter().all(PatchOutcome::is_success);
        Self {
            image: image.path().display().to_string(),
            os: image.os().name.clone(),
            status: status(success).to_string(),
            created_at_utc: timestamp(OffsetDateTime::now_utc()),
            patches,
            errors: errors.iter().map(|e| format!("{:#}", e)).collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.patches.iter().map(|p| p.errors.len()).sum::<usize>()
    }
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failed"
    }
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// `patch-report.json` next to the image.
pub fn report_path(image: &OperatingSystemImage) -> PathBuf {
    image
        .path()
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(REPORT_FILENAME)
}

pub fn write_report(image: &OperatingSystemImage, report: &PatchReport) -> Result<PathBuf> {
    let path = report_path(image);
    let json = serde_json::to_vec_pretty(report).context("serializing patch report")?;
    fs::write(&path, json).with_context(|| format!("writing patch report '{}'", path.display()))?;
    Ok(path)
}

pub fn load_report(path: &Path) -> Result<PatchReport> {
    let bytes = fs::read(path).with_context(|| format!("reading patch report '{}'", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing patch report '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{Credentials, OperatingSystem};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_report_is_written_next_to_image() {
        let temp = TempDir::new().unwrap();
        let os = OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"));
        let image = OperatingSystemImage::new(Arc::new(os), temp.path().join("raspios.img"));
        let now = OffsetDateTime::now_utc();
        let outcomes = vec![
            PatchOutcome {
                name: "Enable SSH".into(),
                errors: Vec::new(),
                started: now,
                finished: now,
            },
            PatchOutcome {
                name: "Copy File to /etc/motd".into(),
                errors: vec![anyhow::anyhow!("source missing").context("Put(motd -> /etc/motd)")],
                started: now,
                finished: now,
            },
        ];

        let report = PatchReport::new(&image, &outcomes, &[]);
        assert!(!report.is_success());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.patches[0].status, "success");
        assert_eq!(report.patches[1].errors, vec!["Put(motd -> /etc/motd): source missing"]);

        let path = write_report(&image, &report).unwrap();
        assert_eq!(path, temp.path().join("patch-report.json"));
        assert_eq!(load_report(&path).unwrap(), report);
    }

    #[test]
    fn test_timestamps_are_rfc3339() {
        let at = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(timestamp(at), "1970-01-01T00:00:00Z");
    }
}
