//! CSV sample store
//!
//! One row per concurrency level: an integer `concurrency` column plus
//! `<metric>_<stat>` float columns. Empty cells are unknown values.
//! Quoted fields are supported but may not span lines.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::{MetricField, MetricsSample, SequenceLengths, StatKind, METRIC_ORDER};

pub const CONCURRENCY_COLUMN: &str = "concurrency";
pub const DEPLOYMENT_COLUMN: &str = "deployment_name";
pub const INPUT_LENGTH_COLUMN: &str = "input_sequence_length_avg";
pub const OUTPUT_LENGTH_COLUMN: &str = "output_sequence_length_avg";

/// Errors from loading or writing a sample table
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table has no header row")]
    Empty,

    #[error("required column '{0}' not found")]
    MissingColumn(String),

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: invalid concurrency '{value}'")]
    InvalidConcurrency { line: usize, value: String },
}

/// An ordered set of samples plus the columns they were loaded from
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    deployment: Option<String>,
    columns: Vec<String>,
    samples: Vec<MetricsSample>,
}

impl SampleTable {
    /// Build a table from parsed samples, sorted by concurrency
    pub fn from_samples(mut samples: Vec<MetricsSample>) -> Self {
        samples.sort_by_key(MetricsSample::concurrency);
        let columns = column_order(&samples, false);
        Self {
            deployment: None,
            columns,
            samples,
        }
    }

    /// Attach a deployment name written to the `deployment_name` column
    pub fn with_deployment(mut self, name: impl Into<String>) -> Self {
        self.deployment = Some(name.into());
        self.columns = column_order(&self.samples, true);
        self
    }

    /// Read and parse a CSV file
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let content = fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_csv(&content)
    }

    /// Parse CSV text
    pub fn parse_csv(content: &str) -> Result<Self, TableError> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let (_, header_line) = lines.next().ok_or(TableError::Empty)?;
        let columns: Vec<String> = split_csv_line(header_line)
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let concurrency_idx = columns
            .iter()
            .position(|c| c == CONCURRENCY_COLUMN)
            .ok_or_else(|| TableError::MissingColumn(CONCURRENCY_COLUMN.to_string()))?;

        let mut deployment = None;
        let mut samples = Vec::new();

        for (idx, line) in lines {
            let line_no = idx + 1;
            let cells = split_csv_line(line);
            if cells.len() != columns.len() {
                return Err(TableError::Malformed {
                    line: line_no,
                    message: format!("expected {} fields, found {}", columns.len(), cells.len()),
                });
            }

            let concurrency = parse_concurrency(cells[concurrency_idx].trim()).ok_or_else(|| {
                TableError::InvalidConcurrency {
                    line: line_no,
                    value: cells[concurrency_idx].clone(),
                }
            })?;
            let mut sample = MetricsSample::new(concurrency).map_err(|_| {
                TableError::InvalidConcurrency {
                    line: line_no,
                    value: cells[concurrency_idx].clone(),
                }
            })?;

            let mut lengths = SequenceLengths::default();
            for (column, cell) in columns.iter().zip(cells.iter()) {
                let cell = cell.trim();
                if column == CONCURRENCY_COLUMN || cell.is_empty() {
                    continue;
                }
                if column == DEPLOYMENT_COLUMN {
                    deployment.get_or_insert_with(|| cell.to_string());
                    continue;
                }
                let Ok(value) = cell.parse::<f64>() else {
                    debug!(column = %column, line = line_no, "Skipping non-numeric cell");
                    continue;
                };
                match column.as_str() {
                    INPUT_LENGTH_COLUMN => lengths.input_avg = Some(value),
                    OUTPUT_LENGTH_COLUMN => lengths.output_avg = Some(value),
                    _ => {}
                }
                match MetricField::parse(column) {
                    Some(field) => sample.set_stat(&field.metric, field.stat, value),
                    None => sample.set_scalar(column.clone(), value),
                }
            }
            if lengths.input_avg.is_some() || lengths.output_avg.is_some() {
                sample.set_sequence_lengths(lengths);
            }
            samples.push(sample);
        }

        samples.sort_by_key(MetricsSample::concurrency);

        Ok(Self {
            deployment,
            columns,
            samples,
        })
    }

    pub fn deployment(&self) -> Option<&str> {
        self.deployment.as_deref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn samples(&self) -> &[MetricsSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<MetricsSample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Render the table as CSV text
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| csv_escape(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');

        for sample in &self.samples {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|column| self.cell(sample, column))
                .collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    /// Write the table to a CSV file
    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| TableError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, self.to_csv()).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn cell(&self, sample: &MetricsSample, column: &str) -> String {
        let value = match column {
            CONCURRENCY_COLUMN => return sample.concurrency().to_string(),
            DEPLOYMENT_COLUMN => {
                return self.deployment.as_deref().map(csv_escape).unwrap_or_default()
            }
            INPUT_LENGTH_COLUMN => sample
                .sequence_lengths()
                .and_then(|l| l.input_avg)
                .or_else(|| sample.scalar(column)),
            OUTPUT_LENGTH_COLUMN => sample
                .sequence_lengths()
                .and_then(|l| l.output_avg)
                .or_else(|| sample.scalar(column)),
            _ => match MetricField::parse(column) {
                Some(field) => sample.value(&field),
                None => sample.scalar(column),
            },
        };
        value.map(|v| v.to_string()).unwrap_or_default()
    }
}

/// Column order for writing: identity columns, sequence lengths, known
/// metrics by statistic, then every other column sorted by name
fn column_order(samples: &[MetricsSample], with_deployment: bool) -> Vec<String> {
    let mut columns = vec![CONCURRENCY_COLUMN.to_string()];
    if with_deployment {
        columns.push(DEPLOYMENT_COLUMN.to_string());
    }

    let has_lengths = |pick: fn(&SequenceLengths) -> Option<f64>| {
        samples
            .iter()
            .any(|s| s.sequence_lengths().and_then(pick).is_some())
    };
    if has_lengths(|l| l.input_avg) {
        columns.push(INPUT_LENGTH_COLUMN.to_string());
    }
    if has_lengths(|l| l.output_avg) {
        columns.push(OUTPUT_LENGTH_COLUMN.to_string());
    }

    let mut present: BTreeSet<String> = BTreeSet::new();
    for sample in samples {
        for (metric, stat) in sample.metrics() {
            for kind in StatKind::ALL {
                if stat.get(kind).is_some() {
                    present.insert(MetricField::new(metric.clone(), kind).column_name());
                }
            }
        }
        present.extend(sample.scalars().keys().cloned());
    }

    for metric in METRIC_ORDER {
        for kind in StatKind::ALL {
            let name = MetricField::new(*metric, kind).column_name();
            if present.remove(&name) {
                columns.push(name);
            }
        }
    }

    for name in present {
        if !columns.contains(&name) {
            columns.push(name);
        }
    }
    columns
}

fn parse_concurrency(cell: &str) -> Option<u32> {
    cell.parse::<u32>().ok().or_else(|| {
        let value = cell.parse::<f64>().ok()?;
        (value.fract() == 0.0 && value >= 0.0 && value <= u32::MAX as f64).then(|| value as u32)
    })
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
