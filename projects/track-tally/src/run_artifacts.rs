// Run artifact struct definitions
//
// The run report is the only artifact a run produces; it can be returned over
// HTTP or persisted as JSON next to the annotated frames.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Outcome of a run that reached `Done`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Observations per class label, keyed by each track's last label
    pub class_totals: BTreeMap<String, usize>,
    /// Frames that went through detection
    pub processed_frame_count: usize,
    pub frames_read: usize,
    pub frames_total: usize,
    pub native_fps: f64,
    pub cancelled: bool,
    pub elapsed_seconds: f64,
    pub finished_at: DateTime<Utc>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            class_totals: BTreeMap::new(),
            processed_frame_count: 0,
            frames_read: 0,
            frames_total: 0,
            native_fps: 0.0,
            cancelled: false,
            elapsed_seconds: 0.0,
            finished_at: Utc::now(),
        }
    }
}

impl RunReport {
    pub fn total_observations(&self) -> usize {
        self.class_totals.values().sum()
    }
}

pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(report)?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<RunReport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read run report at {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_written_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        let mut report = RunReport::default();
        report.class_totals.insert("car".to_string(), 5);
        report.class_totals.insert("person".to_string(), 2);
        report.processed_frame_count = 20;

        write_report(&report, &path).unwrap();
        let loaded = read_report(&path).unwrap();

        assert_eq!(loaded, report);
        assert_eq!(loaded.total_observations(), 7);
    }
}
