//! SLO constraint evaluation
//!
//! A constraint set holds two groups of latency thresholds:
//! - `scalable`: multiplied by the current scale factor
//! - `fixed`: always compared at face value
//!
//! A sample satisfies the set only if every constrained value is strictly
//! below its threshold. Unknown values compare as `+inf`, so a sample that
//! lacks a constrained metric never satisfies the SLO.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::samples::{
    MetricField, MetricsSample, SampleTable, StatKind, INTER_TOKEN_LATENCY, REQUEST_LATENCY,
    TIME_TO_FIRST_TOKEN, TIME_TO_SECOND_TOKEN,
};

/// Errors detected when a constraint set is validated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SloConfigError {
    #[error("SLO has no constraints")]
    Empty,

    #[error("constraint '{0}' does not name a known metric field")]
    UnknownMetric(String),

    #[error("constraint '{name}' has invalid threshold {value}")]
    InvalidThreshold { name: String, value: f64 },

    #[error("constraint '{name}' needs column '{column}', which the sample table lacks")]
    MissingColumn { name: String, column: String },

    #[error("invalid constraint '{0}', expected NAME=VALUE")]
    InvalidAssignment(String),
}

/// Caller-supplied latency thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SloConstraints {
    #[serde(default)]
    pub scalable: BTreeMap<String, f64>,
    #[serde(default)]
    pub fixed: BTreeMap<String, f64>,
}

impl SloConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalable(mut self, name: impl Into<String>, threshold: f64) -> Self {
        self.scalable.insert(name.into(), threshold);
        self
    }

    pub fn with_fixed(mut self, name: impl Into<String>, threshold: f64) -> Self {
        self.fixed.insert(name.into(), threshold);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.scalable.is_empty() && self.fixed.is_empty()
    }

    /// Parse a `NAME=VALUE` command-line constraint
    pub fn parse_assignment(input: &str) -> Result<(String, f64), SloConfigError> {
        let (name, value) = input
            .split_once('=')
            .ok_or_else(|| SloConfigError::InvalidAssignment(input.to_string()))?;
        let name = name.trim();
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| SloConfigError::InvalidAssignment(input.to_string()))?;
        if name.is_empty() {
            return Err(SloConfigError::InvalidAssignment(input.to_string()));
        }
        Ok((name.to_string(), value))
    }

    /// One-line rendering such as `ttft<4000 (scaled), itl<20`
    pub fn describe(&self) -> String {
        let scalable = self
            .scalable
            .iter()
            .map(|(name, v)| format!("{}<{} (scaled)", name, v));
        let fixed = self.fixed.iter().map(|(name, v)| format!("{}<{}", name, v));
        scalable.chain(fixed).collect::<Vec<_>>().join(", ")
    }
}

/// Maps constraint and output names to sample fields
///
/// Names without an explicit entry resolve through their `<metric>_<stat>`
/// form, so `time_to_first_token_p90` needs no mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMap {
    entries: BTreeMap<String, MetricField>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        let p90 = |metric: &str| MetricField::new(metric, StatKind::P90);
        let entries = [
            ("ttft", p90(TIME_TO_FIRST_TOKEN)),
            ("ttft_p90", p90(TIME_TO_FIRST_TOKEN)),
            ("ttst", p90(TIME_TO_SECOND_TOKEN)),
            ("ttst_p90", p90(TIME_TO_SECOND_TOKEN)),
            ("itl", p90(INTER_TOKEN_LATENCY)),
            ("itl_p90", p90(INTER_TOKEN_LATENCY)),
            ("tpot", p90(INTER_TOKEN_LATENCY)),
            ("tpot_p90", p90(INTER_TOKEN_LATENCY)),
            ("e2e", p90(REQUEST_LATENCY)),
            ("e2e_p90", p90(REQUEST_LATENCY)),
        ]
        .into_iter()
        .map(|(name, field)| (name.to_string(), field))
        .collect();
        Self { entries }
    }
}

impl ColumnMap {
    /// A map with no aliases; only `<metric>_<stat>` names resolve
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, name: impl Into<String>, field: MetricField) -> Self {
        self.entries.insert(name.into(), field);
        self
    }

    /// Overlay entries from another map
    pub fn extend(&mut self, other: &ColumnMap) {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn resolve(&self, name: &str) -> Option<MetricField> {
        self.entries
            .get(name)
            .cloned()
            .or_else(|| MetricField::parse(name))
    }
}

/// A validated constraint bound to its sample field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConstraint {
    pub name: String,
    pub field: MetricField,
    pub threshold: f64,
    pub scalable: bool,
}

impl ResolvedConstraint {
    pub fn threshold_at(&self, scale_factor: f64) -> f64 {
        if self.scalable {
            self.threshold * scale_factor
        } else {
            self.threshold
        }
    }

    /// Sample value, with unknown and NaN read as `+inf`
    pub fn actual(&self, sample: &MetricsSample) -> f64 {
        sample
            .value(&self.field)
            .filter(|v| !v.is_nan())
            .unwrap_or(f64::INFINITY)
    }
}

/// Outcome of one constraint for one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintCheck {
    pub name: String,
    pub actual: Option<f64>,
    pub threshold: f64,
    pub passed: bool,
}

/// Full outcome of evaluating one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SloVerdict {
    pub satisfied: bool,
    pub checks: Vec<ConstraintCheck>,
}

/// Predicate over samples for a validated constraint set
#[derive(Debug, Clone)]
pub struct SloEvaluator {
    constraints: Vec<ResolvedConstraint>,
}

impl SloEvaluator {
    /// Validate `constraints` against `columns`
    pub fn new(constraints: &SloConstraints, columns: &ColumnMap) -> Result<Self, SloConfigError> {
        if constraints.is_empty() {
            return Err(SloConfigError::Empty);
        }

        let scalable = constraints.scalable.iter().map(|(n, t)| (n, *t, true));
        let fixed = constraints.fixed.iter().map(|(n, t)| (n, *t, false));

        let resolved = scalable
            .chain(fixed)
            .map(|(name, threshold, scalable)| {
                if !threshold.is_finite() || threshold < 0.0 {
                    return Err(SloConfigError::InvalidThreshold {
                        name: name.clone(),
                        value: threshold,
                    });
                }
                let field = columns
                    .resolve(name)
                    .ok_or_else(|| SloConfigError::UnknownMetric(name.clone()))?;
                Ok(ResolvedConstraint {
                    name: name.clone(),
                    field,
                    threshold,
                    scalable,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            constraints: resolved,
        })
    }

    pub fn constraints(&self) -> &[ResolvedConstraint] {
        &self.constraints
    }

    /// Fail fast if a constrained column is absent from `table`
    pub fn check_columns(&self, table: &SampleTable) -> Result<(), SloConfigError> {
        for constraint in &self.constraints {
            let column = constraint.field.column_name();
            if !table.has_column(&column) {
                return Err(SloConfigError::MissingColumn {
                    name: constraint.name.clone(),
                    column,
                });
            }
        }
        Ok(())
    }

    /// True if every constraint holds at `scale_factor`
    pub fn satisfies(&self, sample: &MetricsSample, scale_factor: f64) -> bool {
        self.constraints
            .iter()
            .all(|c| c.actual(sample) < c.threshold_at(scale_factor))
    }

    /// Evaluate every constraint without short-circuiting
    pub fn evaluate(&self, sample: &MetricsSample, scale_factor: f64) -> SloVerdict {
        let checks: Vec<ConstraintCheck> = self
            .constraints
            .iter()
            .map(|c| {
                let threshold = c.threshold_at(scale_factor);
                ConstraintCheck {
                    name: c.name.clone(),
                    actual: sample.value(&c.field).filter(|v| !v.is_nan()),
                    threshold,
                    passed: c.actual(sample) < threshold,
                }
            })
            .collect();
        SloVerdict {
            satisfied: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    /// Values of the constrained fields, keyed by constraint name
    pub fn observed(&self, sample: &MetricsSample) -> BTreeMap<String, Option<f64>> {
        self.constraints
            .iter()
            .map(|c| (c.name.clone(), sample.value(&c.field)))
            .collect()
    }
}
