//! Bulk extraction of JSON reports from a results directory
//!
//! Load-generator runs are stored one directory per level, with the level
//! in the directory name (`.../concurrency16/.../profile_export_genai_perf.json`).
//! Sequence lengths missing from a report are read from `isl<N>_osl<M>` in
//! its path.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{parse_json_report, sequence_lengths_from_name, ReportError};
use crate::samples::MetricsSample;

static CONCURRENCY_IN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"concurrency(\d+)").expect("Failed to compile concurrency directory regex")
});

/// Concurrency encoded in the nearest ancestor directory named `concurrency<N>`
pub fn concurrency_from_path(path: &Path) -> Option<u32> {
    path.components().rev().find_map(|component| match component {
        Component::Normal(name) => {
            let name = name.to_str()?;
            let caps = CONCURRENCY_IN_NAME.captures(name)?;
            caps[1].parse::<u32>().ok().filter(|c| *c > 0)
        }
        _ => None,
    })
}

/// Parse every `report_file` under `dir`, one sample per concurrency
///
/// Files without a concurrency in their path, or that fail to parse, are
/// skipped with a warning. When two files share a concurrency the one
/// visited last wins; files are visited in sorted path order.
pub fn extract_reports(dir: &Path, report_file: &str) -> Result<Vec<MetricsSample>, ReportError> {
    let mut files = Vec::new();
    collect_files(dir, report_file, &mut files)?;
    files.sort();

    let mut samples: BTreeMap<u32, MetricsSample> = BTreeMap::new();
    for path in files {
        let Some(concurrency) = concurrency_from_path(&path) else {
            debug!(file = %path.display(), "No concurrency in path, skipping");
            continue;
        };
        let content = std::fs::read_to_string(&path).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        let mut sample = match parse_json_report(&content, concurrency) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable report");
                continue;
            }
        };
        if sample.sequence_lengths().is_none() {
            if let Some(lengths) = sequence_lengths_from_name(&path.to_string_lossy()) {
                sample.set_sequence_lengths(lengths);
            }
        }
        samples.insert(concurrency, sample);
    }

    Ok(samples.into_values().collect())
}

fn collect_files(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> Result<(), ReportError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ReportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, file_name, found)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            found.push(path);
        }
    }
    Ok(())
}
