//! Persisted search and curve reports
//!
//! Every goodput search produces a [`SearchReport`] holding the SLO, the
//! search parameters, the best result and the full step trace. Reports are
//! written as JSON under `<output_dir>/raw/` and summarized in
//! `<output_dir>/summary.md`.

pub mod io;
pub mod markdown;

pub use io::{ReportStore, RAW_SUBDIR, SUMMARY_FILENAME};
pub use markdown::{generate_summary, one_line_summary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scaling::{ScaleSweep, ScalingCurve};
use crate::search::{SearchConfig, SearchOutcome};
use crate::slo::SloConstraints;

/// Result of one goodput search for one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub run_id: Uuid,
    pub deployment: String,
    /// Name of the configured SLO profile, if one was used
    #[serde(default)]
    pub slo_profile: Option<String>,
    pub slo: SloConstraints,
    pub search: SearchConfig,
    pub outcome: SearchOutcome,
    pub timestamp: DateTime<Utc>,
}

impl SearchReport {
    pub fn new(
        deployment: impl Into<String>,
        slo_profile: Option<String>,
        slo: SloConstraints,
        search: SearchConfig,
        outcome: SearchOutcome,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            deployment: deployment.into(),
            slo_profile,
            slo,
            search,
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// True if some concurrency level met the SLO
    pub fn is_success(&self) -> bool {
        !self.outcome.best.is_empty()
    }

    pub fn slo_label(&self) -> String {
        self.slo_profile
            .clone()
            .unwrap_or_else(|| self.slo.describe())
    }
}

/// Scaling curves computed from one sample table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveReport {
    pub run_id: Uuid,
    pub label: String,
    pub slo: SloConstraints,
    pub sweep: ScaleSweep,
    pub curves: Vec<ScalingCurve>,
    pub timestamp: DateTime<Utc>,
}

impl CurveReport {
    pub fn new(
        label: impl Into<String>,
        slo: SloConstraints,
        sweep: ScaleSweep,
        curves: Vec<ScalingCurve>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            label: label.into(),
            slo,
            sweep,
            curves,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchResult, StopReason};

    pub(crate) fn report(deployment: &str, concurrency: u32, goodput: f64) -> SearchReport {
        SearchReport::new(
            deployment,
            Some("strict".to_string()),
            SloConstraints::new().with_scalable("ttft", 4000.0),
            SearchConfig::default(),
            SearchOutcome {
                best: SearchResult {
                    concurrency,
                    request_goodput: goodput,
                    ..Default::default()
                },
                steps: Vec::new(),
                stop_reason: StopReason::FailureLimit,
            },
        )
    }

    #[test]
    fn test_report_success() {
        assert!(report("agg", 20, 8.0).is_success());
        assert!(!report("agg", 0, 0.0).is_success());
    }

    #[test]
    fn test_slo_label() {
        let mut r = report("agg", 20, 8.0);
        assert_eq!(r.slo_label(), "strict");
        r.slo_profile = None;
        assert_eq!(r.slo_label(), "ttft<4000 (scaled)");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let r = report("agg", 20, 8.0);
        let json = serde_json::to_string(&r).unwrap();
        let back: SearchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
