//! Replay of stored reports
//!
//! Serves previously captured reports keyed by concurrency, either from
//! memory or from a directory of `c<N>.json` / `c<N>.txt` files. Levels
//! without a stored report fail with [`MeasurementError::ReportMissing`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{MeasurementError, Measurer, RawReport, Workload};

#[derive(Debug, Default)]
pub struct ReplayMeasurer {
    source: String,
    reports: BTreeMap<u32, RawReport>,
    calls: Mutex<Vec<u32>>,
}

impl ReplayMeasurer {
    pub fn new() -> Self {
        Self {
            source: "memory".to_string(),
            ..Default::default()
        }
    }

    pub fn with_report(mut self, concurrency: u32, report: RawReport) -> Self {
        self.reports.insert(concurrency, report);
        self
    }

    /// Load every `c<N>.json` and `c<N>.txt` file in `dir`
    pub fn from_dir(dir: &Path) -> Result<Self, MeasurementError> {
        let io_err =
            |path: PathBuf| move |source: std::io::Error| MeasurementError::Io { path, source };

        let mut measurer = Self {
            source: dir.display().to_string(),
            ..Default::default()
        };

        for entry in std::fs::read_dir(dir).map_err(io_err(dir.to_path_buf()))? {
            let path = entry.map_err(io_err(dir.to_path_buf()))?.path();
            let Some((concurrency, is_json)) = replay_file_key(&path) else {
                continue;
            };
            let content = std::fs::read_to_string(&path).map_err(io_err(path.clone()))?;
            let report = if is_json {
                RawReport::Json(content)
            } else {
                RawReport::Text(content)
            };
            debug!(concurrency, file = %path.display(), "Loaded replay report");
            measurer.reports.insert(concurrency, report);
        }

        Ok(measurer)
    }

    /// Concurrency levels with a stored report
    pub fn levels(&self) -> Vec<u32> {
        self.reports.keys().copied().collect()
    }

    /// Concurrency levels requested so far, in call order
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// `c10.json` → `(10, true)`, `c10.txt` → `(10, false)`
fn replay_file_key(path: &Path) -> Option<(u32, bool)> {
    let stem = path.file_stem()?.to_str()?;
    let concurrency = stem.strip_prefix('c')?.parse::<u32>().ok()?;
    match path.extension()?.to_str()? {
        "json" => Some((concurrency, true)),
        "txt" => Some((concurrency, false)),
        _ => None,
    }
}

#[async_trait]
impl Measurer for ReplayMeasurer {
    fn id(&self) -> String {
        format!("replay:{}", self.source)
    }

    async fn measure(
        &self,
        concurrency: u32,
        _workload: &Workload,
    ) -> Result<RawReport, MeasurementError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(concurrency);
        }
        self.reports
            .get(&concurrency)
            .cloned()
            .ok_or_else(|| MeasurementError::ReportMissing {
                concurrency,
                location: self.source.clone(),
            })
    }
}
