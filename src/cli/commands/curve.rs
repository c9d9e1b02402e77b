//! Curve command implementation
//!
//! Sweeps the SLO scale factor over one or more stored sample tables and
//! reports, per table, the best value of each tracked output at every
//! factor.
//!
//! ```bash
//! goodput-lens curve agg=agg.csv disagg=disagg.csv --profile strict
//! goodput-lens curve runs.csv --scalable ttft=4000 --fixed itl=20 --metric concurrency
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use tracing::info;

use super::{build_constraints, format_value, print_json};
use crate::cli::CurveArgs;
use crate::config::Config;
use crate::reports::{CurveReport, ReportStore};
use crate::samples::SampleTable;
use crate::scaling::{CurveMetric, ScaleSweep, ScalingCurve, ScalingCurveComputer};
use crate::slo::SloEvaluator;

/// Curves of one labelled table
#[derive(Debug, Serialize)]
struct LabelledCurves {
    label: String,
    samples: usize,
    curves: Vec<ScalingCurve>,
}

/// Run the curve command
pub fn run(args: CurveArgs, mut config: Config, json_output: bool, quiet: bool) -> Result<()> {
    let sweep = sweep_from(&args, &config.sweep);
    sweep.validate().context("Invalid scale sweep")?;
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }

    let (_, constraints) = build_constraints(&args.slo, &config)?;
    let evaluator = SloEvaluator::new(&constraints, &config.columns())
        .with_context(|| format!("Invalid SLO: {}", constraints.describe()))?;

    let explicit: Vec<CurveMetric> = args
        .metrics
        .iter()
        .map(|name| {
            CurveMetric::parse(name).ok_or_else(|| {
                anyhow!("Unknown curve metric '{}', expected concurrency or <metric>_<stat>", name)
            })
        })
        .collect::<Result<_>>()?;

    let inputs = args
        .inputs
        .iter()
        .map(|input| parse_input(input))
        .collect::<Result<Vec<_>>>()?;

    // Every table is validated before any curve is computed
    let mut computers = Vec::with_capacity(inputs.len());
    for (label, path) in &inputs {
        let table = SampleTable::load(path)
            .with_context(|| format!("Failed to load sample table: {}", path.display()))?;
        let outputs = if explicit.is_empty() {
            default_outputs(&table)
        } else {
            explicit.clone()
        };
        let computer = ScalingCurveComputer::new(evaluator.clone(), sweep)?.with_outputs(outputs);
        computer
            .check_table(&table)
            .with_context(|| format!("Table '{}' cannot be evaluated", label))?;
        computers.push((label.clone(), table, computer));
    }

    let results: Vec<LabelledCurves> = computers
        .iter()
        .map(|(label, table, computer)| {
            info!(label = %label, samples = table.len(), "Computing scaling curves");
            LabelledCurves {
                label: label.clone(),
                samples: table.len(),
                curves: computer.compute(table.samples()),
            }
        })
        .collect();

    if args.save {
        let store = ReportStore::new(config.output_dir.clone());
        store.ensure_dirs()?;
        for result in &results {
            let report = CurveReport::new(
                result.label.clone(),
                constraints.clone(),
                sweep,
                result.curves.clone(),
            );
            let path = store.write_curve_report(&report)?;
            if !quiet && !json_output {
                println!("{} Curve report written to: {}", "=>".bright_cyan(), path.display());
            }
        }
    }

    if json_output {
        return print_json(&results);
    }
    if quiet {
        return Ok(());
    }

    println!("{}", "Goodput Lens - SLO Scaling Curves".bright_cyan().bold());
    println!("{} SLO: {}", "=>".bright_cyan(), constraints.describe());
    println!(
        "{} Scale factors {} down to {} (step {})",
        "=>".bright_cyan(),
        sweep.scale_max,
        sweep.scale_min,
        sweep.scale_step
    );
    println!();

    print_peaks(&results);
    print_comparison(&results, &sweep);
    Ok(())
}

fn sweep_from(args: &CurveArgs, base: &ScaleSweep) -> ScaleSweep {
    ScaleSweep {
        scale_max: args.scale_max.unwrap_or(base.scale_max),
        scale_min: args.scale_min.unwrap_or(base.scale_min),
        scale_step: args.scale_step.unwrap_or(base.scale_step),
    }
}

/// `LABEL=PATH`, or `PATH` labelled by its file stem
fn parse_input(input: &str) -> Result<(String, PathBuf)> {
    if let Some((label, path)) = input.split_once('=') {
        if label.is_empty() || path.is_empty() {
            return Err(anyhow!("Invalid input '{}', expected LABEL=PATH", input));
        }
        return Ok((label.to_string(), PathBuf::from(path)));
    }
    let path = PathBuf::from(input);
    let label = Path::new(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string());
    Ok((label, path))
}

/// Throughput outputs the table actually carries, plus concurrency
fn default_outputs(table: &SampleTable) -> Vec<CurveMetric> {
    let mut outputs: Vec<CurveMetric> = [CurveMetric::request_throughput(), CurveMetric::token_throughput()]
        .into_iter()
        .filter(|metric| match metric {
            CurveMetric::Field(field) => table.has_column(&field.column_name()),
            CurveMetric::Concurrency => true,
        })
        .collect();
    outputs.push(CurveMetric::Concurrency);
    outputs
}

fn print_peaks(results: &[LabelledCurves]) {
    #[derive(Tabled)]
    struct PeakRow {
        #[tabled(rename = "Table")]
        label: String,
        #[tabled(rename = "Samples")]
        samples: usize,
        #[tabled(rename = "Output")]
        metric: String,
        #[tabled(rename = "Peak")]
        peak: String,
        #[tabled(rename = "At Factor")]
        factor: String,
        #[tabled(rename = "Non-zero Points")]
        nonzero: String,
        #[tabled(rename = "Tightest Factor")]
        tightest: String,
    }

    let rows: Vec<PeakRow> = results
        .iter()
        .flat_map(|result| {
            result.curves.iter().map(move |curve| {
                let peak = curve.peak();
                PeakRow {
                    label: result.label.clone(),
                    samples: result.samples,
                    metric: curve.metric.to_string(),
                    peak: format_value(peak.map(|p| p.value), 2),
                    factor: format_value(peak.map(|p| p.factor), 2),
                    nonzero: format!("{}/{}", curve.nonzero_count(), curve.points.len()),
                    tightest: format_value(curve.tightest_satisfied_factor(), 2),
                }
            })
        })
        .collect();

    println!("{}", "Curve Peaks".bright_cyan().bold().underline());
    println!();
    println!("{}", Table::new(rows));
}

/// First output of every table side by side, one row per scale factor
fn print_comparison(results: &[LabelledCurves], sweep: &ScaleSweep) {
    let columns: Vec<(String, &ScalingCurve)> = results
        .iter()
        .filter_map(|r| r.curves.first().map(|c| (format!("{} {}", r.label, c.metric), c)))
        .collect();
    if columns.is_empty() {
        return;
    }

    let mut builder = tabled::builder::Builder::default();
    let mut header = vec!["Scale Factor".to_string()];
    header.extend(columns.iter().map(|(name, _)| name.clone()));
    builder.push_record(header);

    for factor in sweep.factors() {
        let mut row = vec![format!("{:.2}", factor)];
        row.extend(
            columns
                .iter()
                .map(|(_, curve)| format_value(curve.value_at(factor), 2)),
        );
        builder.push_record(row);
    }

    println!();
    println!("{}", "Curve Comparison".bright_cyan().bold().underline());
    println!();
    println!("{}", builder.build());
}
