//! Markdown summary of search reports

use std::fmt::Write;

use super::SearchReport;
use crate::search::{DeploymentResult, DeploymentSummary};

/// One line per report, e.g. `agg: c=20 goodput=8.00 req/s (6 steps)`
pub fn one_line_summary(report: &SearchReport) -> String {
    let best = &report.outcome.best;
    if best.is_empty() {
        format!(
            "{}: no concurrency met the SLO ({} steps)",
            report.deployment,
            report.outcome.steps.len()
        )
    } else {
        format!(
            "{}: c={} goodput={:.2} req/s, {:.1} tok/s ({} steps)",
            report.deployment,
            best.concurrency,
            best.request_goodput,
            best.token_goodput,
            report.outcome.steps.len()
        )
    }
}

/// Markdown document covering every report, newest run first
pub fn generate_summary(reports: &[SearchReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Goodput Search Summary");
    let _ = writeln!(out);

    if reports.is_empty() {
        let _ = writeln!(out, "_No search reports found._");
        return out;
    }

    let _ = writeln!(
        out,
        "| Deployment | SLO | Best Concurrency | Request Goodput | Token Goodput | Steps | Timestamp |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    for report in reports {
        let best = &report.outcome.best;
        let concurrency = if best.is_empty() {
            "none".to_string()
        } else {
            best.concurrency.to_string()
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.2} | {:.1} | {} | {} |",
            report.deployment,
            report.slo_label(),
            concurrency,
            best.request_goodput,
            best.token_goodput,
            report.outcome.steps.len(),
            report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let results: Vec<DeploymentResult> = reports
        .iter()
        .map(|r| DeploymentResult {
            deployment: r.deployment.clone(),
            outcome: r.outcome.clone(),
        })
        .collect();
    let summary = DeploymentSummary::from_results(&results);

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**{}/{}** runs met the SLO ({:.1}%).",
        summary.satisfied, summary.total, summary.satisfaction_rate
    );
    if let Some(best) = &summary.best_performer {
        let _ = writeln!(out, "Best request goodput: **{}**.", best);
    }
    if let Some(base) = summary.base.as_ref().filter(|_| !summary.improvement_vs_base.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "Request goodput compared with **{}**:", base);
        for (name, change) in &summary.improvement_vs_base {
            let _ = writeln!(out, "- {}: {:+.2}%", name, change);
        }
    }

    out
}
