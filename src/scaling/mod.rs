//! SLO scaling curves
//!
//! Re-evaluates a fixed set of samples while every scalable threshold is
//! multiplied by a common factor, swept from `scale_max` down to
//! `scale_min`. For each factor the maximum of each tracked output over the
//! satisfying samples is recorded (0 when none satisfy). No new
//! measurements are taken.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::samples::{
    MetricField, MetricsSample, SampleTable, StatKind, OUTPUT_TOKEN_THROUGHPUT, REQUEST_THROUGHPUT,
};
use crate::slo::{SloConfigError, SloEvaluator};

/// Tolerance for reaching `scale_min` despite float drift
const SCALE_EPSILON: f64 = 1e-10;

/// Slack on the range/step quotient so `0.3 / 0.1` counts as 3 steps
const STEP_TOLERANCE: f64 = 1e-9;

/// Upper bound on the number of factors in one sweep
pub const MAX_SCALE_FACTORS: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScalingError {
    #[error("invalid scale sweep: {0}")]
    InvalidSweep(String),

    #[error(transparent)]
    Slo(#[from] SloConfigError),

    #[error("tracked output '{output}' needs column '{column}', which the sample table lacks")]
    MissingOutputColumn { output: String, column: String },
}

/// Factor range and resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSweep {
    pub scale_max: f64,
    pub scale_min: f64,
    pub scale_step: f64,
}

impl Default for ScaleSweep {
    fn default() -> Self {
        Self {
            scale_max: 5.0,
            scale_min: 0.0,
            scale_step: 0.1,
        }
    }
}

impl ScaleSweep {
    pub fn validate(&self) -> Result<(), ScalingError> {
        let values = [self.scale_max, self.scale_min, self.scale_step];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ScalingError::InvalidSweep(
                "bounds and step must be finite".to_string(),
            ));
        }
        if self.scale_step <= 0.0 {
            return Err(ScalingError::InvalidSweep(format!(
                "step must be positive, got {}",
                self.scale_step
            )));
        }
        if self.scale_min > self.scale_max {
            return Err(ScalingError::InvalidSweep(format!(
                "min {} is above max {}",
                self.scale_min, self.scale_max
            )));
        }
        if self.factor_count().is_none() {
            return Err(ScalingError::InvalidSweep(format!(
                "step {} yields more than {} factors between {} and {}",
                self.scale_step, MAX_SCALE_FACTORS, self.scale_min, self.scale_max
            )));
        }
        Ok(())
    }

    /// Number of factors in the sweep, `None` when it is not a usable range
    fn factor_count(&self) -> Option<usize> {
        let steps = ((self.scale_max - self.scale_min) / self.scale_step + STEP_TOLERANCE).floor();
        if !steps.is_finite() || steps < 0.0 || steps >= MAX_SCALE_FACTORS as f64 {
            return None;
        }
        (steps as usize).checked_add(1)
    }

    /// Factors from max down to min, inclusive of both ends when the step
    /// divides the range. Empty for a sweep that fails validation.
    pub fn factors(&self) -> Vec<f64> {
        let Some(count) = self.factor_count() else {
            return Vec::new();
        };
        let places = decimal_places(self.scale_step) + 2;

        let mut factors = Vec::with_capacity(count);
        for i in 0..count {
            let factor = round_to(self.scale_max - i as f64 * self.scale_step, places);
            if factor <= self.scale_min + SCALE_EPSILON {
                factors.push(self.scale_min);
                break;
            }
            factors.push(factor);
        }
        factors
    }
}

/// Digits after the decimal point in the shortest rendering of `value`
fn decimal_places(value: f64) -> i32 {
    let rendered = value.to_string();
    rendered
        .split_once('.')
        .map(|(_, frac)| frac.len() as i32)
        .unwrap_or(0)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// An output tracked along the curve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveMetric {
    Concurrency,
    Field(MetricField),
}

impl CurveMetric {
    pub fn request_throughput() -> Self {
        CurveMetric::Field(MetricField::new(REQUEST_THROUGHPUT, StatKind::Avg))
    }

    pub fn token_throughput() -> Self {
        CurveMetric::Field(MetricField::new(OUTPUT_TOKEN_THROUGHPUT, StatKind::Avg))
    }

    /// `concurrency` or a `<metric>_<stat>` column name
    pub fn parse(name: &str) -> Option<Self> {
        if name == "concurrency" {
            Some(CurveMetric::Concurrency)
        } else {
            MetricField::parse(name).map(CurveMetric::Field)
        }
    }

    /// Value for one sample; unknown reads as 0
    pub fn value(&self, sample: &MetricsSample) -> f64 {
        match self {
            CurveMetric::Concurrency => sample.concurrency() as f64,
            CurveMetric::Field(field) => sample
                .value(field)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
        }
    }
}

impl fmt::Display for CurveMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveMetric::Concurrency => f.write_str("concurrency"),
            CurveMetric::Field(field) => write!(f, "{}", field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub factor: f64,
    pub value: f64,
}

/// Maximum of one output per scale factor, in sweep order (descending factor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingCurve {
    pub metric: CurveMetric,
    pub points: Vec<CurvePoint>,
}

impl ScalingCurve {
    /// Highest value; ties resolve to the first point in sweep order
    pub fn peak(&self) -> Option<CurvePoint> {
        self.points.iter().copied().fold(None, |best, p| match best {
            Some(b) if b.value >= p.value => Some(b),
            _ => Some(p),
        })
    }

    pub fn nonzero_count(&self) -> usize {
        self.points.iter().filter(|p| p.value > 0.0).count()
    }

    /// Smallest factor at which some sample still satisfies the SLO
    pub fn tightest_satisfied_factor(&self) -> Option<f64> {
        self.points
            .iter()
            .filter(|p| p.value > 0.0)
            .map(|p| p.factor)
            .reduce(f64::min)
    }

    pub fn value_at(&self, factor: f64) -> Option<f64> {
        self.points
            .iter()
            .find(|p| (p.factor - factor).abs() < SCALE_EPSILON)
            .map(|p| p.value)
    }
}

/// Builds scaling curves for a validated SLO
#[derive(Debug, Clone)]
pub struct ScalingCurveComputer {
    evaluator: SloEvaluator,
    sweep: ScaleSweep,
    outputs: Vec<CurveMetric>,
}

impl ScalingCurveComputer {
    /// Track request throughput, token throughput and concurrency
    pub fn new(evaluator: SloEvaluator, sweep: ScaleSweep) -> Result<Self, ScalingError> {
        sweep.validate()?;
        Ok(Self {
            evaluator,
            sweep,
            outputs: vec![
                CurveMetric::request_throughput(),
                CurveMetric::token_throughput(),
                CurveMetric::Concurrency,
            ],
        })
    }

    /// Replace the tracked outputs
    pub fn with_outputs(mut self, outputs: Vec<CurveMetric>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn outputs(&self) -> &[CurveMetric] {
        &self.outputs
    }

    pub fn sweep(&self) -> &ScaleSweep {
        &self.sweep
    }

    /// Check that the table carries every constrained and tracked column
    pub fn check_table(&self, table: &SampleTable) -> Result<(), ScalingError> {
        self.evaluator.check_columns(table)?;
        for output in &self.outputs {
            if let CurveMetric::Field(field) = output {
                let column = field.column_name();
                if !table.has_column(&column) {
                    return Err(ScalingError::MissingOutputColumn {
                        output: output.to_string(),
                        column,
                    });
                }
            }
        }
        Ok(())
    }

    /// Curves for a validated table
    pub fn compute_table(&self, table: &SampleTable) -> Result<Vec<ScalingCurve>, ScalingError> {
        self.check_table(table)?;
        Ok(self.compute(table.samples()))
    }

    /// One curve per tracked output
    pub fn compute(&self, samples: &[MetricsSample]) -> Vec<ScalingCurve> {
        let factors = self.sweep.factors();
        let mut curves: Vec<ScalingCurve> = self
            .outputs
            .iter()
            .map(|metric| ScalingCurve {
                metric: metric.clone(),
                points: Vec::with_capacity(factors.len()),
            })
            .collect();

        for factor in factors {
            let passing: Vec<&MetricsSample> = samples
                .iter()
                .filter(|s| self.evaluator.satisfies(s, factor))
                .collect();
            debug!(factor, passing = passing.len(), "Evaluated scale factor");

            for curve in &mut curves {
                let value = passing
                    .iter()
                    .map(|s| curve.metric.value(s))
                    .fold(0.0, f64::max);
                curve.points.push(CurvePoint { factor, value });
            }
        }

        curves
    }
}
