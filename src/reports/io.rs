//! File I/O for persisted reports
//!
//! Reports live under a configurable output directory:
//! - `<root>/raw/<deployment>_<timestamp>.json` for search reports
//! - `<root>/raw/curve_<label>_<timestamp>.json` for curve reports
//! - `<root>/summary.md` for the markdown summary

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{CurveReport, SearchReport};

/// Subdirectory for raw JSON reports
pub const RAW_SUBDIR: &str = "raw";

/// Filename for the summary markdown file
pub const SUMMARY_FILENAME: &str = "summary.md";

const CURVE_PREFIX: &str = "curve_";

/// Reads and writes reports below one output directory
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_SUBDIR)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILENAME)
    }

    /// Create the output directories
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.raw_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Write one search report
    pub fn write_search_report(&self, report: &SearchReport) -> Result<PathBuf> {
        let filename = format!(
            "{}_{}.json",
            safe_name(&report.deployment),
            report.timestamp.format("%Y%m%d_%H%M%S_%3f")
        );
        self.write_json(&filename, report)
    }

    /// Write one curve report
    pub fn write_curve_report(&self, report: &CurveReport) -> Result<PathBuf> {
        let filename = format!(
            "{}{}_{}.json",
            CURVE_PREFIX,
            safe_name(&report.label),
            report.timestamp.format("%Y%m%d_%H%M%S_%3f")
        );
        self.write_json(&filename, report)
    }

    fn write_json<T: serde::Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        self.ensure_dirs()?;
        let path = self.raw_dir().join(filename);
        let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write report to: {}", path.display()))?;
        Ok(path)
    }

    /// Read a search report from a JSON file
    pub fn read_search_report(path: &Path) -> Result<SearchReport> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON from: {}", path.display()))
    }

    /// All search reports, newest first; unreadable files are skipped
    pub fn read_search_reports(&self) -> Result<Vec<SearchReport>> {
        let dir = self.raw_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry.context("Failed to read directory entry")?.path();
            let is_curve = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(CURVE_PREFIX));
            if is_curve || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match Self::read_search_report(&path) {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!("Failed to read report from {:?}: {}", path, e),
            }
        }

        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(reports)
    }

    /// Write the markdown summary
    pub fn write_summary(&self, summary: &str) -> Result<PathBuf> {
        self.ensure_dirs()?;
        let path = self.summary_path();
        fs::write(&path, summary)
            .with_context(|| format!("Failed to write summary to: {}", path.display()))?;
        Ok(path)
    }

    /// Regenerate the summary from every stored search report
    pub fn refresh_summary(&self) -> Result<PathBuf> {
        let reports = self.read_search_reports()?;
        self.write_summary(&super::generate_summary(&reports))
    }

    /// Delete all but the newest `keep` reports per deployment
    pub fn cleanup_old_reports(&self, keep: usize) -> Result<usize> {
        let dir = self.raw_dir();
        if !dir.exists() {
            return Ok(0);
        }

        let mut by_deployment: HashMap<String, Vec<(SearchReport, PathBuf)>> = HashMap::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry.context("Failed to read directory entry")?.path();
            if let Ok(report) = Self::read_search_report(&path) {
                by_deployment
                    .entry(report.deployment.clone())
                    .or_default()
                    .push((report, path));
            }
        }

        let mut deleted = 0;
        for (_, mut reports) in by_deployment {
            reports.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));
            for (_, path) in reports.into_iter().skip(keep) {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete: {}", path.display()))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn safe_name(name: &str) -> String {
    name.replace([':', '/', '\\', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::tests::report;
    use crate::scaling::ScaleSweep;
    use crate::slo::SloConstraints;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_reports() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path().join("out"));

        let mut older = report("agg", 10, 4.0);
        older.timestamp = older.timestamp - Duration::seconds(60);
        let newer = report("disagg/tp2", 20, 8.0);

        store.write_search_report(&older).unwrap();
        let path = store.write_search_report(&newer).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("disagg_tp2_"));

        let curve = CurveReport::new("agg", SloConstraints::new(), ScaleSweep::default(), Vec::new());
        store.write_curve_report(&curve).unwrap();

        let reports = store.read_search_reports().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].deployment, "disagg/tp2");
        assert_eq!(reports[1].deployment, "agg");
    }

    #[test]
    fn test_missing_dir_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path().join("nothing"));
        assert!(store.read_search_reports().unwrap().is_empty());
        assert_eq!(store.cleanup_old_reports(1).unwrap(), 0);
    }

    #[test]
    fn test_refresh_summary() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path());
        store.write_search_report(&report("agg", 20, 8.0)).unwrap();

        let path = store.refresh_summary().unwrap();
        let summary = std::fs::read_to_string(path).unwrap();
        assert!(summary.contains("agg"));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path());

        for offset in 0..3 {
            let mut r = report("agg", 10 + offset, 1.0);
            r.timestamp = r.timestamp - Duration::seconds(offset as i64 * 10);
            store.write_search_report(&r).unwrap();
        }
        store.write_search_report(&report("other", 5, 1.0)).unwrap();

        assert_eq!(store.cleanup_old_reports(1).unwrap(), 2);
        let remaining = store.read_search_reports().unwrap();
        assert_eq!(remaining.len(), 2);
        let agg = remaining.iter().find(|r| r.deployment == "agg").unwrap();
        assert_eq!(agg.outcome.best.concurrency, 10);
    }
}
