//! Benchmark report parsing
//!
//! Turns load-generator output into [`MetricsSample`]s. Two formats are
//! understood:
//! - the JSON profile export (one document per concurrency level)
//! - the box-drawn console table (any number of concurrency-tagged blocks)

pub mod extract;
pub mod json;
pub mod numeric;
pub mod text_table;

pub use extract::{concurrency_from_path, extract_reports};
pub use json::{parse_json_report, parse_json_value};
pub use numeric::parse_cell_number;
pub use text_table::{classify_label, parse_text_report, TextTableParser};

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::samples::{MetricsSample, SampleError, SequenceLengths};

static SEQUENCE_LENGTHS_IN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"isl(\d+)[_\-]osl(\d+)").expect("Failed to compile sequence length regex")
});

/// Errors from turning a raw report into a sample
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid JSON report: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("JSON report root is not an object")]
    NotAnObject,

    #[error("no table for concurrency {0} in text report")]
    NoTable(u32),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw output of one measurement, before parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "lowercase")]
pub enum RawReport {
    Json(String),
    Text(String),
}

impl RawReport {
    /// Guess the format from the content
    pub fn detect(content: impl Into<String>) -> Self {
        let content = content.into();
        if content.trim_start().starts_with('{') {
            RawReport::Json(content)
        } else {
            RawReport::Text(content)
        }
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            RawReport::Json(_) => "json",
            RawReport::Text(_) => "text",
        }
    }

    /// Parse into the sample for `concurrency`
    ///
    /// Text reports may hold several blocks; the block tagged with
    /// `concurrency` is chosen, and untagged tables are attributed to it.
    pub fn parse(&self, concurrency: u32) -> Result<MetricsSample, ReportError> {
        match self {
            RawReport::Json(content) => parse_json_report(content, concurrency),
            RawReport::Text(content) => TextTableParser::new()
                .with_default_concurrency(concurrency)
                .parse(content)
                .into_iter()
                .find(|s| s.concurrency() == concurrency)
                .ok_or(ReportError::NoTable(concurrency)),
        }
    }
}

/// Read `isl<N>_osl<M>` (or `isl<N>-osl<M>`) from a file or directory name
pub fn sequence_lengths_from_name(name: &str) -> Option<SequenceLengths> {
    let caps = SEQUENCE_LENGTHS_IN_NAME.captures(name)?;
    Some(SequenceLengths {
        input_avg: caps[1].parse().ok(),
        output_avg: caps[2].parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{StatKind, TIME_TO_FIRST_TOKEN};

    #[test]
    fn test_detect_format() {
        assert_eq!(RawReport::detect("  {\"a\": 1}").format_name(), "json");
        assert_eq!(RawReport::detect("┃ Statistic ┃").format_name(), "text");
    }

    #[test]
    fn test_text_report_selects_block() {
        let text = "\
x - Concurrency: 1
┃ Statistic ┃ avg ┃
│ Time To First Token │ 1 │ 1 │ 1 │ 1 │ 11 │ 1 │
x - Concurrency: 2
┃ Statistic ┃ avg ┃
│ Time To First Token │ 1 │ 1 │ 1 │ 1 │ 22 │ 1 │
";
        let report = RawReport::Text(text.to_string());

        let sample = report.parse(2).unwrap();
        assert_eq!(sample.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(22.0));
        assert!(matches!(report.parse(3), Err(ReportError::NoTable(3))));
    }

    #[test]
    fn test_sequence_lengths_from_name() {
        let lengths = sequence_lengths_from_name("itl_ttft_isl3000_osl150.txt").unwrap();
        assert_eq!(lengths.input_avg, Some(3000.0));
        assert_eq!(lengths.output_avg, Some(150.0));

        assert!(sequence_lengths_from_name("isl3000-osl150").is_some());
        assert!(sequence_lengths_from_name("results.txt").is_none());
    }
}
