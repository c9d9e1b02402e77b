//! LLM Goodput Lens
//!
//! Finds the highest request concurrency a serving deployment can sustain
//! while meeting a tail-latency SLO, and shows how that maximum moves as
//! the SLO is tightened or loosened.
//!
//! # Modules
//!
//! - [`samples`]: canonical per-concurrency metrics records and the CSV store
//! - [`parser`]: JSON and console-table report parsing
//! - [`slo`]: SLO constraint validation and evaluation
//! - [`measure`]: measurement collaborators (subprocess, replay)
//! - [`search`]: the adaptive goodput search and multi-deployment comparison
//! - [`scaling`]: SLO scaling curves over stored samples
//! - [`reports`]: persisted reports and markdown summaries
//! - [`config`]: file and environment configuration

pub mod cli;
pub mod config;
pub mod measure;
pub mod parser;
pub mod reports;
pub mod samples;
pub mod scaling;
pub mod search;
pub mod slo;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use measure::{CommandMeasurer, MeasurementError, Measurer, RawReport, ReplayMeasurer, Workload};
pub use parser::{parse_json_report, parse_text_report, ReportError, TextTableParser};
pub use samples::{MetricField, MetricsSample, SampleTable, Stat, StatKind};
pub use scaling::{CurveMetric, ScaleSweep, ScalingCurve, ScalingCurveComputer, ScalingError};
pub use search::{
    search_deployments, Deployment, DeploymentSummary, GoodputMetric, GoodputSearch, SearchConfig,
    SearchOutcome, SearchResult,
};
pub use slo::{ColumnMap, SloConfigError, SloConstraints, SloEvaluator};
