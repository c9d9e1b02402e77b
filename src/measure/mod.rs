//! Measurement collaborators
//!
//! A [`Measurer`] produces one raw report for one concurrency level. The
//! goodput search treats every error returned here as a failed step, so
//! implementations only need to classify what went wrong.

pub mod command;
pub mod replay;

pub use command::{CommandMeasurer, CommandMeasurerConfig, DEFAULT_REPORT_FILE};
pub use replay::ReplayMeasurer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use crate::parser::RawReport;

/// Errors from a single measurement
#[derive(Debug, Error)]
pub enum MeasurementError {
    /// The measurement program could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program did not finish in time and was killed
    #[error("measurement at concurrency {concurrency} timed out after {timeout_secs}s")]
    Timeout { concurrency: u32, timeout_secs: u64 },

    /// The program exited unsuccessfully
    #[error("measurement exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// No report was produced for this concurrency
    #[error("no report found for concurrency {concurrency} in {location}")]
    ReportMissing { concurrency: u32, location: String },

    /// Filesystem error while preparing or collecting artifacts
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MeasurementError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MeasurementError::Timeout { .. })
    }

    /// Short machine-readable kind, used in step traces
    pub fn kind(&self) -> &'static str {
        match self {
            MeasurementError::Spawn { .. } => "spawn",
            MeasurementError::Timeout { .. } => "timeout",
            MeasurementError::NonZeroExit { .. } => "exit",
            MeasurementError::ReportMissing { .. } => "report_missing",
            MeasurementError::Io { .. } => "io",
        }
    }
}

/// Traffic shape requested from the load generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workload {
    /// Deployment name, used to namespace artifacts
    pub deployment: String,
    /// Model identifier passed to the load generator
    pub model: String,
    /// Endpoint of the service under test
    pub url: String,
    /// Tokenizer path or name; the model is used when empty
    pub tokenizer: String,
    pub input_tokens_mean: u32,
    pub input_tokens_stddev: u32,
    pub output_tokens_mean: u32,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            deployment: "default".to_string(),
            model: String::new(),
            url: "http://localhost:8000".to_string(),
            tokenizer: String::new(),
            input_tokens_mean: 1024,
            input_tokens_stddev: 0,
            output_tokens_mean: 128,
        }
    }
}

impl Workload {
    pub fn for_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    pub fn tokenizer_or_model(&self) -> &str {
        if self.tokenizer.is_empty() {
            &self.model
        } else {
            &self.tokenizer
        }
    }
}

/// Runs one measurement at a given concurrency
#[async_trait]
pub trait Measurer: Send + Sync {
    /// Identifier used in logs and reports
    fn id(&self) -> String;

    /// Measure `workload` at `concurrency` and return the raw report
    async fn measure(
        &self,
        concurrency: u32,
        workload: &Workload,
    ) -> Result<RawReport, MeasurementError>;
}
