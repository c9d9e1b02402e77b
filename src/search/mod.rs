//! Adaptive goodput search
//!
//! Sweeps concurrency upward from `start` in fixed increments, measuring
//! each level and checking it against the SLO at scale 1. A satisfying
//! level resets the failure counter and may become the new best; a
//! violation or a failed measurement counts towards `max_failures`
//! consecutive misses, after which the search stops.
//!
//! Goodput is the throughput of a level that meets the SLO; levels that
//! miss it contribute nothing.

pub mod deployments;

pub use deployments::{search_deployments, Deployment, DeploymentResult, DeploymentSummary};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::measure::{Measurer, Workload};
use crate::samples::{
    MetricsSample, StatKind, OUTPUT_SEQUENCE_LENGTH, OUTPUT_TOKEN_THROUGHPUT,
    OUTPUT_TOKEN_THROUGHPUT_PER_USER, REQUEST_THROUGHPUT,
};
use crate::slo::{ConstraintCheck, SloEvaluator};

/// Invalid search parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchConfigError {
    #[error("start concurrency must be greater than zero")]
    ZeroStart,

    #[error("concurrency step must be greater than zero")]
    ZeroStep,

    #[error("max_failures must be greater than zero")]
    ZeroMaxFailures,

    #[error("max_concurrency {max} is below start concurrency {start}")]
    CapBelowStart { start: u32, max: u32 },

    #[error("unknown goodput metric '{0}', expected request, token or token_per_user")]
    UnknownGoodputMetric(String),
}

/// Which goodput decides the best level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodputMetric {
    #[default]
    Request,
    Token,
    TokenPerUser,
}

impl FromStr for GoodputMetric {
    type Err = SearchConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(GoodputMetric::Request),
            "token" => Ok(GoodputMetric::Token),
            "token_per_user" => Ok(GoodputMetric::TokenPerUser),
            other => Err(SearchConfigError::UnknownGoodputMetric(other.to_string())),
        }
    }
}

impl fmt::Display for GoodputMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoodputMetric::Request => "request",
            GoodputMetric::Token => "token",
            GoodputMetric::TokenPerUser => "token_per_user",
        };
        f.write_str(name)
    }
}

/// Search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// First concurrency level measured
    pub start: u32,
    /// Increment between levels
    pub step: u32,
    /// Consecutive misses that end the search
    pub max_failures: u32,
    /// Optional upper bound on concurrency
    pub max_concurrency: Option<u32>,
    /// Goodput used to rank satisfying levels
    pub goodput_metric: GoodputMetric,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            start: 1,
            step: 10,
            max_failures: 3,
            max_concurrency: None,
            goodput_metric: GoodputMetric::Request,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.start == 0 {
            return Err(SearchConfigError::ZeroStart);
        }
        if self.step == 0 {
            return Err(SearchConfigError::ZeroStep);
        }
        if self.max_failures == 0 {
            return Err(SearchConfigError::ZeroMaxFailures);
        }
        if let Some(max) = self.max_concurrency {
            if max < self.start {
                return Err(SearchConfigError::CapBelowStart {
                    start: self.start,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Goodput values of one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Goodput {
    pub request: f64,
    pub token: f64,
    pub token_per_user: f64,
}

impl Goodput {
    /// Throughput of `sample`, with unknown values read as 0
    ///
    /// Token throughput falls back to request throughput times the average
    /// output sequence length when the report does not carry it.
    pub fn of(sample: &MetricsSample) -> Self {
        let request = sample.stat(REQUEST_THROUGHPUT, StatKind::Avg);
        let token = sample
            .stat(OUTPUT_TOKEN_THROUGHPUT, StatKind::Avg)
            .or_else(|| {
                let osl = sample.stat(OUTPUT_SEQUENCE_LENGTH, StatKind::Avg)?;
                request.map(|r| r * osl)
            });
        let per_user = sample.stat(OUTPUT_TOKEN_THROUGHPUT_PER_USER, StatKind::Avg);

        Self {
            request: request.unwrap_or(0.0),
            token: token.unwrap_or(0.0),
            token_per_user: per_user.unwrap_or(0.0),
        }
    }

    pub fn get(&self, metric: GoodputMetric) -> f64 {
        match metric {
            GoodputMetric::Request => self.request,
            GoodputMetric::Token => self.token,
            GoodputMetric::TokenPerUser => self.token_per_user,
        }
    }
}

/// Best SLO-satisfying level found by a search
///
/// `concurrency == 0` marks the empty result: no level met the SLO.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub concurrency: u32,
    pub request_goodput: f64,
    pub token_goodput: f64,
    pub token_goodput_per_user: f64,
    pub observed_latencies: BTreeMap<String, Option<f64>>,
}

impl SearchResult {
    /// The "nothing satisfied the SLO" result
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.concurrency == 0
    }

    fn from_sample(sample: &MetricsSample, goodput: Goodput, evaluator: &SloEvaluator) -> Self {
        Self {
            concurrency: sample.concurrency(),
            request_goodput: goodput.request,
            token_goodput: goodput.token,
            token_goodput_per_user: goodput.token_per_user,
            observed_latencies: evaluator.observed(sample),
        }
    }

    pub fn goodput(&self, metric: GoodputMetric) -> f64 {
        match metric {
            GoodputMetric::Request => self.request_goodput,
            GoodputMetric::Token => self.token_goodput,
            GoodputMetric::TokenPerUser => self.token_goodput_per_user,
        }
    }
}

/// What happened at one concurrency level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Satisfied { goodput: Goodput, new_best: bool },
    Violated { failed: Vec<String> },
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStep {
    pub concurrency: u32,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FailureLimit,
    ConcurrencyCap,
}

/// Best result plus the trace of every level measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: SearchResult,
    pub steps: Vec<SearchStep>,
    pub stop_reason: StopReason,
}

impl SearchOutcome {
    pub fn satisfied_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Satisfied { .. }))
            .count()
    }
}

/// Linear concurrency sweep with a consecutive-failure window
#[derive(Debug, Clone)]
pub struct GoodputSearch {
    evaluator: SloEvaluator,
    config: SearchConfig,
}

impl GoodputSearch {
    pub fn new(evaluator: SloEvaluator, config: SearchConfig) -> Result<Self, SearchConfigError> {
        config.validate()?;
        Ok(Self { evaluator, config })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &SloEvaluator {
        &self.evaluator
    }

    /// Run the sweep against `measurer`
    #[instrument(skip_all, fields(measurer = %measurer.id(), deployment = %workload.deployment))]
    pub async fn run(&self, measurer: &dyn Measurer, workload: &Workload) -> SearchOutcome {
        let metric = self.config.goodput_metric;
        let mut concurrency = self.config.start;
        let mut consecutive_failures = 0;
        let mut best = SearchResult::empty();
        let mut steps = Vec::new();
        let mut stop_reason = StopReason::FailureLimit;

        while consecutive_failures < self.config.max_failures {
            if self.config.max_concurrency.is_some_and(|max| concurrency > max) {
                stop_reason = StopReason::ConcurrencyCap;
                break;
            }

            let outcome = match self.measure(measurer, workload, concurrency).await {
                Err((kind, message)) => {
                    consecutive_failures += 1;
                    warn!(
                        concurrency,
                        consecutive_failures,
                        kind = %kind,
                        error = %message,
                        "Measurement failed"
                    );
                    StepOutcome::Failed { kind, message }
                }
                Ok(sample) => {
                    let verdict = self.evaluator.evaluate(&sample, 1.0);
                    if verdict.satisfied {
                        consecutive_failures = 0;
                        let goodput = Goodput::of(&sample);
                        let new_best = goodput.get(metric) > best.goodput(metric);
                        if new_best {
                            best = SearchResult::from_sample(&sample, goodput, &self.evaluator);
                        }
                        info!(
                            concurrency,
                            goodput = goodput.get(metric),
                            new_best,
                            "SLO satisfied"
                        );
                        StepOutcome::Satisfied { goodput, new_best }
                    } else {
                        consecutive_failures += 1;
                        let failed = failed_names(&verdict.checks);
                        info!(
                            concurrency,
                            consecutive_failures,
                            failed = ?failed,
                            "SLO violated"
                        );
                        StepOutcome::Violated { failed }
                    }
                }
            };
            steps.push(SearchStep {
                concurrency,
                outcome,
            });

            match concurrency.checked_add(self.config.step) {
                Some(next) => concurrency = next,
                None => {
                    stop_reason = StopReason::ConcurrencyCap;
                    break;
                }
            }
        }

        info!(
            best_concurrency = best.concurrency,
            best_goodput = best.goodput(metric),
            steps = steps.len(),
            stop_reason = ?stop_reason,
            "Goodput search finished"
        );

        SearchOutcome {
            best,
            steps,
            stop_reason,
        }
    }

    async fn measure(
        &self,
        measurer: &dyn Measurer,
        workload: &Workload,
        concurrency: u32,
    ) -> Result<MetricsSample, (String, String)> {
        let raw = measurer
            .measure(concurrency, workload)
            .await
            .map_err(|e| (e.kind().to_string(), e.to_string()))?;
        raw.parse(concurrency)
            .map_err(|e| ("report_unreadable".to_string(), e.to_string()))
    }
}

fn failed_names(checks: &[ConstraintCheck]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.clone())
        .collect()
}
