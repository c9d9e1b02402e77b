//! Search command implementation
//!
//! Runs the goodput search for every selected deployment, persists one
//! report per deployment and prints the best level of each.
//!
//! ```bash
//! goodput-lens search --profile strict
//! goodput-lens search --scalable ttft=4000 --fixed itl=20 --replay-dir runs/
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::{Table, Tabled};
use tracing::info;

use super::{build_constraints, format_value, print_json};
use crate::cli::SearchArgs;
use crate::config::{Config, DeploymentConfig};
use crate::measure::{CommandMeasurer, Measurer, ReplayMeasurer};
use crate::reports::{one_line_summary, ReportStore, SearchReport};
use crate::search::{
    search_deployments, Deployment, DeploymentSummary, GoodputSearch, StepOutcome,
};
use crate::slo::SloEvaluator;

/// Run the search command
pub async fn run(args: SearchArgs, mut config: Config, json_output: bool, quiet: bool) -> Result<()> {
    apply_overrides(&args, &mut config);
    config.validate().context("Invalid configuration")?;

    let (profile, constraints) = build_constraints(&args.slo, &config)?;
    let evaluator = SloEvaluator::new(&constraints, &config.columns())
        .with_context(|| format!("Invalid SLO: {}", constraints.describe()))?;
    let search = GoodputSearch::new(evaluator, config.search.clone())?;

    let deployments = select_deployments(&args, &config)?;
    info!(
        deployments = deployments.len(),
        slo = %constraints.describe(),
        "Starting goodput search"
    );

    if !quiet && !json_output {
        println!("{}", "Goodput Lens - Concurrency Search".bright_cyan().bold());
        println!();
        println!(
            "{} SLO: {}",
            "=>".bright_cyan(),
            profile
                .clone()
                .map(|p| format!("{} ({})", p, constraints.describe()))
                .unwrap_or_else(|| constraints.describe())
        );
        println!(
            "{} Searching {} deployment(s) from concurrency {} in steps of {}...",
            "=>".bright_cyan(),
            deployments.len(),
            config.search.start,
            config.search.step
        );
        println!();
    }

    let results = search_deployments(&search, &deployments).await;

    let reports: Vec<SearchReport> = results
        .iter()
        .map(|result| {
            SearchReport::new(
                result.deployment.clone(),
                profile.clone(),
                constraints.clone(),
                config.search.clone(),
                result.outcome.clone(),
            )
        })
        .collect();

    let store = ReportStore::new(config.output_dir.clone());
    if !args.no_save {
        persist_reports(&store, &reports, args.keep)?;
    }

    if json_output {
        return print_json(&reports);
    }
    if quiet {
        return Ok(());
    }

    if reports.len() == 1 {
        print_steps(&reports[0]);
    }
    print_deployments(&reports);

    let summary = DeploymentSummary::from_results(&results);
    println!();
    println!(
        "{} Total: {} | {} | {}",
        "=>".bright_cyan(),
        format!("{} deployments", summary.total).bright_white(),
        format!("{} met the SLO", summary.satisfied).bright_green(),
        format!("{} missed", summary.total - summary.satisfied).bright_red()
    );
    if let Some(best) = &summary.best_performer {
        println!("{} Best request goodput: {}", "=>".bright_cyan(), best.bright_green());
    }
    if let Some(base) = &summary.base {
        for (name, change) in &summary.improvement_vs_base {
            let change = format!("{:+.2}%", change);
            let change = if change.starts_with('-') {
                change.bright_red()
            } else {
                change.bright_green()
            };
            println!("{} {} vs {}: {}", "=>".bright_cyan(), name, base, change);
        }
    }

    if !args.no_save {
        println!(
            "{} Reports written to: {}",
            "=>".bright_cyan(),
            store.raw_dir().display()
        );
        println!(
            "{} Summary available at: {}",
            "=>".bright_cyan(),
            store.summary_path().display()
        );
    }

    println!();
    println!("{} Goodput search complete!", "✓".bright_green().bold());
    Ok(())
}

fn apply_overrides(args: &SearchArgs, config: &mut Config) {
    if let Some(start) = args.start {
        config.search.start = start;
    }
    if let Some(step) = args.step {
        config.search.step = step;
    }
    if let Some(max_failures) = args.max_failures {
        config.search.max_failures = max_failures;
    }
    if args.max_concurrency.is_some() {
        config.search.max_concurrency = args.max_concurrency;
    }
    if let Some(metric) = args.goodput_metric {
        config.search.goodput_metric = metric;
    }
    if let Some(timeout) = args.timeout {
        config.measurement.timeout_secs = timeout;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
}

/// Write the reports, prune old ones when asked and refresh the summary
fn persist_reports(store: &ReportStore, reports: &[SearchReport], keep: Option<u32>) -> Result<PathBuf> {
    store.ensure_dirs()?;
    for report in reports {
        store.write_search_report(report)?;
    }
    if let Some(keep) = keep {
        let deleted = store.cleanup_old_reports(keep as usize)?;
        if deleted > 0 {
            info!(deleted, keep, "Removed old search reports");
        }
    }
    store.refresh_summary()
}

/// Deployments named on the command line, else every configured one,
/// else a single deployment from the shared workload
fn select_deployments(args: &SearchArgs, config: &Config) -> Result<Vec<Deployment>> {
    let selected: Vec<DeploymentConfig> = if !args.deployments.is_empty() {
        args.deployments
            .iter()
            .map(|name| {
                config
                    .deployments
                    .iter()
                    .find(|d| &d.name == name)
                    .cloned()
                    .unwrap_or_else(|| DeploymentConfig {
                        name: name.clone(),
                        url: None,
                        model: None,
                        tokenizer: None,
                    })
            })
            .collect()
    } else if !config.deployments.is_empty() {
        config.deployments.clone()
    } else {
        vec![DeploymentConfig {
            name: config.workload.deployment.clone(),
            url: None,
            model: None,
            tokenizer: None,
        }]
    };

    selected
        .iter()
        .map(|deployment| {
            let measurer = measurer_for(args.replay_dir.as_deref(), &deployment.name, config)?;
            Ok(Deployment::new(
                deployment.name.clone(),
                deployment.workload(&config.workload),
                measurer,
            ))
        })
        .collect()
}

/// Replays from `<dir>/<deployment>` when that exists, else from `<dir>`
fn measurer_for(
    replay_dir: Option<&Path>,
    deployment: &str,
    config: &Config,
) -> Result<Arc<dyn Measurer>> {
    let Some(dir) = replay_dir else {
        return Ok(Arc::new(CommandMeasurer::new(config.measurement.clone())));
    };

    let per_deployment = dir.join(deployment);
    let dir = if per_deployment.is_dir() {
        per_deployment
    } else {
        dir.to_path_buf()
    };
    let measurer = ReplayMeasurer::from_dir(&dir)
        .with_context(|| format!("Failed to load replay reports from {}", dir.display()))?;
    Ok(Arc::new(measurer))
}

fn print_steps(report: &SearchReport) {
    #[derive(Tabled)]
    struct StepRow {
        #[tabled(rename = "Concurrency")]
        concurrency: u32,
        #[tabled(rename = "Result")]
        result: String,
        #[tabled(rename = "Request Goodput")]
        request: String,
        #[tabled(rename = "Token Goodput")]
        token: String,
        #[tabled(rename = "Detail")]
        detail: String,
    }

    let rows: Vec<StepRow> = report
        .outcome
        .steps
        .iter()
        .map(|step| match &step.outcome {
            StepOutcome::Satisfied { goodput, new_best } => StepRow {
                concurrency: step.concurrency,
                result: "PASS".bright_green().to_string(),
                request: format!("{:.2}", goodput.request),
                token: format!("{:.1}", goodput.token),
                detail: if *new_best { "new best".to_string() } else { String::new() },
            },
            StepOutcome::Violated { failed } => StepRow {
                concurrency: step.concurrency,
                result: "MISS".bright_red().to_string(),
                request: "-".to_string(),
                token: "-".to_string(),
                detail: failed.join(", "),
            },
            StepOutcome::Failed { kind, message } => StepRow {
                concurrency: step.concurrency,
                result: "ERROR".bright_red().to_string(),
                request: "-".to_string(),
                token: "-".to_string(),
                detail: format!("{}: {}", kind, message),
            },
        })
        .collect();

    println!("{}", format!("Search Trace: {}", report.deployment).bright_cyan().bold());
    println!("{}", Table::new(rows));
    println!();
}

fn print_deployments(reports: &[SearchReport]) {
    #[derive(Tabled)]
    struct DeploymentRow {
        #[tabled(rename = "Deployment")]
        deployment: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Best Concurrency")]
        concurrency: String,
        #[tabled(rename = "Request Goodput")]
        request: String,
        #[tabled(rename = "Token Goodput")]
        token: String,
        #[tabled(rename = "Token/User")]
        per_user: String,
        #[tabled(rename = "Steps")]
        steps: usize,
    }

    let rows: Vec<DeploymentRow> = reports
        .iter()
        .map(|report| {
            let best = &report.outcome.best;
            let found = !best.is_empty();
            DeploymentRow {
                deployment: report.deployment.clone(),
                status: if found {
                    "PASS".bright_green().to_string()
                } else {
                    "FAIL".bright_red().to_string()
                },
                concurrency: if found { best.concurrency.to_string() } else { "none".to_string() },
                request: format_value(found.then_some(best.request_goodput), 2),
                token: format_value(found.then_some(best.token_goodput), 1),
                per_user: format_value(found.then_some(best.token_goodput_per_user), 1),
                steps: report.outcome.steps.len(),
            }
        })
        .collect();

    println!("{}", "Goodput Search Results".bright_cyan().bold().underline());
    println!();
    println!("{}", Table::new(rows));
    for report in reports {
        info!(summary = %one_line_summary(report), "Search result");
    }
}
