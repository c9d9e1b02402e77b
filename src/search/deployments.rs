//! Concurrent goodput search across deployments
//!
//! Each deployment is searched sequentially on its own; deployments run
//! side by side, one worker per deployment. Results come back in input
//! order together with a ranking summary.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{GoodputSearch, SearchOutcome};
use crate::measure::{Measurer, Workload};

/// One deployment to search
#[derive(Clone)]
pub struct Deployment {
    pub name: String,
    pub workload: Workload,
    pub measurer: Arc<dyn Measurer>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, workload: Workload, measurer: Arc<dyn Measurer>) -> Self {
        let name = name.into();
        Self {
            workload: workload.for_deployment(name.clone()),
            name,
            measurer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub deployment: String,
    pub outcome: SearchOutcome,
}

impl DeploymentResult {
    pub fn satisfied(&self) -> bool {
        !self.outcome.best.is_empty()
    }
}

/// Cross-deployment comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub total: usize,
    pub satisfied: usize,
    /// Percentage of deployments with a non-empty result
    pub satisfaction_rate: f64,
    /// Satisfying deployments by request goodput, best first
    pub by_request_goodput: Vec<(String, f64)>,
    /// Satisfying deployments by token goodput, best first
    pub by_token_goodput: Vec<(String, f64)>,
    pub best_performer: Option<String>,
    /// Deployment the others are compared against, the first one given
    pub base: Option<String>,
    /// Request goodput change over `base` in percent for every other
    /// deployment; empty when the base reached no goodput
    pub improvement_vs_base: Vec<(String, f64)>,
}

impl DeploymentSummary {
    pub fn from_results(results: &[DeploymentResult]) -> Self {
        let satisfied: Vec<&DeploymentResult> = results.iter().filter(|r| r.satisfied()).collect();

        let ranking = |pick: fn(&DeploymentResult) -> f64| {
            let mut ranked: Vec<(String, f64)> = satisfied
                .iter()
                .map(|r| (r.deployment.clone(), pick(r)))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked
        };
        let by_request_goodput = ranking(|r| r.outcome.best.request_goodput);
        let by_token_goodput = ranking(|r| r.outcome.best.token_goodput);

        let (base, improvement_vs_base) = match results.split_first() {
            Some((base, rest)) if !rest.is_empty() => {
                let base_goodput = base.outcome.best.request_goodput;
                let improvements = if base_goodput > 0.0 {
                    rest.iter()
                        .map(|r| {
                            let change = (r.outcome.best.request_goodput - base_goodput)
                                / base_goodput
                                * 100.0;
                            (r.deployment.clone(), change)
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                (Some(base.deployment.clone()), improvements)
            }
            _ => (None, Vec::new()),
        };

        let satisfaction_rate = if results.is_empty() {
            0.0
        } else {
            satisfied.len() as f64 / results.len() as f64 * 100.0
        };

        Self {
            total: results.len(),
            satisfied: satisfied.len(),
            satisfaction_rate,
            best_performer: by_request_goodput.first().map(|(name, _)| name.clone()),
            by_request_goodput,
            by_token_goodput,
            base,
            improvement_vs_base,
        }
    }
}

/// Search every deployment concurrently
pub async fn search_deployments(
    search: &GoodputSearch,
    deployments: &[Deployment],
) -> Vec<DeploymentResult> {
    info!(deployments = deployments.len(), "Starting multi-deployment search");

    let searches = deployments.iter().map(|deployment| async move {
        let outcome = search
            .run(deployment.measurer.as_ref(), &deployment.workload)
            .await;
        info!(
            deployment = %deployment.name,
            best_concurrency = outcome.best.concurrency,
            "Deployment search finished"
        );
        DeploymentResult {
            deployment: deployment.name.clone(),
            outcome,
        }
    });

    join_all(searches).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchResult, StopReason};

    fn result(name: &str, concurrency: u32, request: f64, token: f64) -> DeploymentResult {
        DeploymentResult {
            deployment: name.to_string(),
            outcome: SearchOutcome {
                best: SearchResult {
                    concurrency,
                    request_goodput: request,
                    token_goodput: token,
                    ..Default::default()
                },
                steps: Vec::new(),
                stop_reason: StopReason::FailureLimit,
            },
        }
    }

    #[test]
    fn test_summary_ranking() {
        let results = vec![
            result("agg", 20, 8.0, 900.0),
            result("disagg", 40, 6.0, 1200.0),
            result("broken", 0, 0.0, 0.0),
        ];
        let summary = DeploymentSummary::from_results(&results);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.satisfied, 2);
        assert!((summary.satisfaction_rate - 66.666).abs() < 0.01);
        assert_eq!(summary.best_performer.as_deref(), Some("agg"));
        assert_eq!(summary.by_request_goodput[0].0, "agg");
        assert_eq!(summary.by_token_goodput[0].0, "disagg");
        assert!(summary.by_request_goodput.iter().all(|(n, _)| n != "broken"));

        assert_eq!(summary.base.as_deref(), Some("agg"));
        assert_eq!(
            summary.improvement_vs_base,
            vec![("disagg".to_string(), -25.0), ("broken".to_string(), -100.0)]
        );
    }

    #[test]
    fn test_improvement_needs_base_goodput() {
        let results = vec![result("broken", 0, 0.0, 0.0), result("agg", 20, 8.0, 900.0)];
        let summary = DeploymentSummary::from_results(&results);
        assert_eq!(summary.base.as_deref(), Some("broken"));
        assert!(summary.improvement_vs_base.is_empty());

        let single = DeploymentSummary::from_results(&results[1..]);
        assert!(single.base.is_none());
        assert!(single.improvement_vs_base.is_empty());
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = DeploymentSummary::from_results(&[]);
        assert_eq!(summary.satisfaction_rate, 0.0);
        assert!(summary.best_performer.is_none());
    }
}
