//! Canonical metrics sample model
//!
//! A [`MetricsSample`] is one observation of a serving deployment at a fixed
//! concurrency level. Every statistic is optional: an absent value means
//! "unknown", which is never the same thing as zero.

pub mod table;

pub use table::{SampleTable, TableError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Well-known metric names produced by genai-perf style reports
pub const TIME_TO_FIRST_TOKEN: &str = "time_to_first_token";
pub const TIME_TO_SECOND_TOKEN: &str = "time_to_second_token";
pub const INTER_TOKEN_LATENCY: &str = "inter_token_latency";
pub const REQUEST_LATENCY: &str = "request_latency";
pub const REQUEST_THROUGHPUT: &str = "request_throughput";
pub const OUTPUT_TOKEN_THROUGHPUT: &str = "output_token_throughput";
pub const OUTPUT_TOKEN_THROUGHPUT_PER_USER: &str = "output_token_throughput_per_user";
pub const INPUT_SEQUENCE_LENGTH: &str = "input_sequence_length";
pub const OUTPUT_SEQUENCE_LENGTH: &str = "output_sequence_length";

/// Metrics listed first, in this order, when samples are written out as a table
pub const METRIC_ORDER: &[&str] = &[
    TIME_TO_FIRST_TOKEN,
    TIME_TO_SECOND_TOKEN,
    INTER_TOKEN_LATENCY,
    REQUEST_LATENCY,
    REQUEST_THROUGHPUT,
    OUTPUT_TOKEN_THROUGHPUT,
    OUTPUT_TOKEN_THROUGHPUT_PER_USER,
];

/// Errors raised when constructing a sample
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
}

/// A single summary statistic of a latency or throughput distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Avg,
    Min,
    Max,
    P50,
    P90,
    P95,
    P99,
    Std,
    Count,
}

impl StatKind {
    /// All statistics, in canonical column order
    pub const ALL: [StatKind; 9] = [
        StatKind::Avg,
        StatKind::Min,
        StatKind::Max,
        StatKind::P50,
        StatKind::P90,
        StatKind::P95,
        StatKind::P99,
        StatKind::Std,
        StatKind::Count,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Avg => "avg",
            StatKind::Min => "min",
            StatKind::Max => "max",
            StatKind::P50 => "p50",
            StatKind::P90 => "p90",
            StatKind::P95 => "p95",
            StatKind::P99 => "p99",
            StatKind::Std => "std",
            StatKind::Count => "count",
        }
    }

    /// Parse a statistic name; `median` is accepted as an alias of `p50`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "avg" => Some(StatKind::Avg),
            "min" => Some(StatKind::Min),
            "max" => Some(StatKind::Max),
            "p50" | "median" => Some(StatKind::P50),
            "p90" => Some(StatKind::P90),
            "p95" => Some(StatKind::P95),
            "p99" => Some(StatKind::P99),
            "std" => Some(StatKind::Std),
            "count" => Some(StatKind::Count),
            _ => None,
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics for one metric; any subset may be present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
}

impl Stat {
    pub fn get(&self, kind: StatKind) -> Option<f64> {
        match kind {
            StatKind::Avg => self.avg,
            StatKind::Min => self.min,
            StatKind::Max => self.max,
            StatKind::P50 => self.p50,
            StatKind::P90 => self.p90,
            StatKind::P95 => self.p95,
            StatKind::P99 => self.p99,
            StatKind::Std => self.std,
            StatKind::Count => self.count,
        }
    }

    pub fn set(&mut self, kind: StatKind, value: f64) {
        let slot = match kind {
            StatKind::Avg => &mut self.avg,
            StatKind::Min => &mut self.min,
            StatKind::Max => &mut self.max,
            StatKind::P50 => &mut self.p50,
            StatKind::P90 => &mut self.p90,
            StatKind::P95 => &mut self.p95,
            StatKind::P99 => &mut self.p99,
            StatKind::Std => &mut self.std,
            StatKind::Count => &mut self.count,
        };
        *slot = Some(value);
    }

    /// Builder-style setter
    pub fn with(mut self, kind: StatKind, value: f64) -> Self {
        self.set(kind, value);
        self
    }

    /// True if no statistic is known
    pub fn is_empty(&self) -> bool {
        StatKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

/// Average input and output sequence lengths of a run, used for labeling
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceLengths {
    pub input_avg: Option<f64>,
    pub output_avg: Option<f64>,
}

impl SequenceLengths {
    /// Short label such as `isl1024_osl128`
    pub fn label(&self) -> Option<String> {
        match (self.input_avg, self.output_avg) {
            (Some(i), Some(o)) => Some(format!("isl{:.0}_osl{:.0}", i, o)),
            _ => None,
        }
    }
}

/// A metric/statistic pair addressing one value of a sample, e.g.
/// `time_to_first_token` / `p90`, written as `time_to_first_token_p90`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricField {
    pub metric: String,
    pub stat: StatKind,
}

impl MetricField {
    pub fn new(metric: impl Into<String>, stat: StatKind) -> Self {
        Self {
            metric: metric.into(),
            stat,
        }
    }

    /// Split a `<metric>_<stat>` column name at its last underscore
    pub fn parse(column: &str) -> Option<Self> {
        let (metric, stat) = column.rsplit_once('_')?;
        if metric.is_empty() {
            return None;
        }
        StatKind::from_name(stat).map(|stat| Self::new(metric, stat))
    }

    /// Column name used in sample tables
    pub fn column_name(&self) -> String {
        format!("{}_{}", self.metric, self.stat)
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.metric, self.stat)
    }
}

/// One observation at a fixed concurrency level
///
/// Samples are built once by a parser or a table loader and are not
/// mutated once handed to the evaluator or the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    concurrency: u32,
    #[serde(default)]
    metrics: BTreeMap<String, Stat>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scalars: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence_lengths: Option<SequenceLengths>,
}

impl MetricsSample {
    /// Create an empty sample; concurrency must be positive
    pub fn new(concurrency: u32) -> Result<Self, SampleError> {
        if concurrency == 0 {
            return Err(SampleError::ZeroConcurrency);
        }
        Ok(Self {
            concurrency,
            metrics: BTreeMap::new(),
            scalars: BTreeMap::new(),
            sequence_lengths: None,
        })
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn metrics(&self) -> &BTreeMap<String, Stat> {
        &self.metrics
    }

    pub fn scalars(&self) -> &BTreeMap<String, f64> {
        &self.scalars
    }

    pub fn sequence_lengths(&self) -> Option<&SequenceLengths> {
        self.sequence_lengths.as_ref()
    }

    pub fn metric(&self, name: &str) -> Option<&Stat> {
        self.metrics.get(name)
    }

    /// Look up one statistic of one metric
    pub fn stat(&self, metric: &str, kind: StatKind) -> Option<f64> {
        self.metrics.get(metric).and_then(|s| s.get(kind))
    }

    /// Resolve a field, falling back to a scalar stored under its column name
    pub fn value(&self, field: &MetricField) -> Option<f64> {
        self.stat(&field.metric, field.stat)
            .or_else(|| self.scalars.get(&field.column_name()).copied())
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    pub fn set_stat(&mut self, metric: &str, kind: StatKind, value: f64) {
        self.metrics
            .entry(metric.to_string())
            .or_default()
            .set(kind, value);
    }

    pub fn insert_metric(&mut self, metric: impl Into<String>, stat: Stat) {
        self.metrics.insert(metric.into(), stat);
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.scalars.insert(name.into(), value);
    }

    pub fn set_sequence_lengths(&mut self, lengths: SequenceLengths) {
        self.sequence_lengths = Some(lengths);
    }

    /// Builder-style variant of [`MetricsSample::set_stat`]
    pub fn with_stat(mut self, metric: &str, kind: StatKind, value: f64) -> Self {
        self.set_stat(metric, kind, value);
        self
    }

    /// True if the sample carries no metric, scalar or sequence length
    pub fn is_empty(&self) -> bool {
        self.metrics.values().all(Stat::is_empty)
            && self.scalars.is_empty()
            && self.sequence_lengths.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_concurrency_rejected() {
        assert_eq!(MetricsSample::new(0), Err(SampleError::ZeroConcurrency));
        assert!(MetricsSample::new(1).is_ok());
    }

    #[test]
    fn test_metric_field_parse() {
        let field = MetricField::parse("time_to_first_token_p90").unwrap();
        assert_eq!(field.metric, "time_to_first_token");
        assert_eq!(field.stat, StatKind::P90);
        assert_eq!(field.column_name(), "time_to_first_token_p90");

        let median = MetricField::parse("request_latency_median").unwrap();
        assert_eq!(median.stat, StatKind::P50);

        assert!(MetricField::parse("concurrency").is_none());
        assert!(MetricField::parse("deployment_name").is_none());
        assert!(MetricField::parse("_p90").is_none());
    }

    #[test]
    fn test_absent_values_are_unknown() {
        let sample = MetricsSample::new(10)
            .unwrap()
            .with_stat(REQUEST_THROUGHPUT, StatKind::Avg, 12.5);

        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::Avg), Some(12.5));
        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::P90), None);
        assert_eq!(sample.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), None);
    }

    #[test]
    fn test_value_falls_back_to_scalar() {
        let mut sample = MetricsSample::new(4).unwrap();
        sample.set_scalar("goodput_avg", 3.0);

        let field = MetricField::parse("goodput_avg").unwrap();
        assert_eq!(sample.value(&field), Some(3.0));
    }

    #[test]
    fn test_stat_is_empty() {
        assert!(Stat::default().is_empty());
        assert!(!Stat::default().with(StatKind::Count, 0.0).is_empty());
    }

    #[test]
    fn test_sequence_length_label() {
        let lengths = SequenceLengths {
            input_avg: Some(1024.0),
            output_avg: Some(127.6),
        };
        assert_eq!(lengths.label().as_deref(), Some("isl1024_osl128"));
        assert_eq!(SequenceLengths::default().label(), None);
    }
}
