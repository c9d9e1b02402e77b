//! Parse command implementation
//!
//! ```bash
//! goodput-lens parse runs/concurrency16/profile_export_genai_perf.json
//! goodput-lens parse console.txt --format text --csv samples.csv
//! ```

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tabled::{Table, Tabled};

use super::{format_value, print_json};
use crate::cli::{ParseArgs, ReportFormat};
use crate::parser::{concurrency_from_path, parse_json_report, RawReport, TextTableParser};
use crate::samples::{MetricsSample, SampleTable, StatKind, METRIC_ORDER};

/// Run the parse command
pub fn run(args: ParseArgs, json_output: bool, quiet: bool) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read report: {}", args.file.display()))?;

    let report = match args.format {
        ReportFormat::Auto => RawReport::detect(content),
        ReportFormat::Json => RawReport::Json(content),
        ReportFormat::Text => RawReport::Text(content),
    };
    let concurrency = args.concurrency.or_else(|| concurrency_from_path(&args.file));
    let samples = parse_report(&report, concurrency)
        .with_context(|| format!("Failed to parse report: {}", args.file.display()))?;

    if let Some(path) = &args.csv {
        SampleTable::from_samples(samples.clone())
            .write(path)
            .with_context(|| format!("Failed to write CSV: {}", path.display()))?;
        if !quiet && !json_output {
            println!("{} Samples written to: {}", "=>".bright_cyan(), path.display());
        }
    }

    if json_output {
        return print_json(&samples);
    }
    if quiet {
        return Ok(());
    }

    println!(
        "{} Parsed {} sample(s) from {} report",
        "=>".bright_cyan(),
        samples.len(),
        report.format_name()
    );
    for sample in &samples {
        print_sample(sample);
    }
    Ok(())
}

/// JSON reports need a concurrency; text reports carry their own per block
fn parse_report(report: &RawReport, concurrency: Option<u32>) -> Result<Vec<MetricsSample>> {
    match report {
        RawReport::Json(content) => {
            let Some(concurrency) = concurrency else {
                bail!("JSON reports need --concurrency or a concurrency<N> directory in their path");
            };
            Ok(vec![parse_json_report(content, concurrency)?])
        }
        RawReport::Text(content) => {
            let parser = TextTableParser::new().with_default_concurrency(concurrency.unwrap_or(1));
            let samples = parser.parse(content);
            if samples.is_empty() {
                bail!("No metrics table found in text report");
            }
            Ok(samples)
        }
    }
}

fn print_sample(sample: &MetricsSample) {
    #[derive(Tabled)]
    struct MetricRow {
        #[tabled(rename = "Metric")]
        metric: String,
        #[tabled(rename = "avg")]
        avg: String,
        #[tabled(rename = "p50")]
        p50: String,
        #[tabled(rename = "p90")]
        p90: String,
        #[tabled(rename = "p99")]
        p99: String,
        #[tabled(rename = "max")]
        max: String,
    }

    let known = METRIC_ORDER
        .iter()
        .filter(|name| sample.metrics().contains_key(**name))
        .map(|name| name.to_string());
    let others = sample
        .metrics()
        .keys()
        .filter(|name| !METRIC_ORDER.contains(&name.as_str()))
        .cloned();

    let rows: Vec<MetricRow> = known
        .chain(others)
        .map(|metric| {
            let stat = |kind| format_value(sample.stat(&metric, kind), 2);
            MetricRow {
                avg: stat(StatKind::Avg),
                p50: stat(StatKind::P50),
                p90: stat(StatKind::P90),
                p99: stat(StatKind::P99),
                max: stat(StatKind::Max),
                metric,
            }
        })
        .collect();

    println!();
    println!(
        "{}",
        format!("Concurrency {}", sample.concurrency()).bright_cyan().bold()
    );
    if let Some(label) = sample.sequence_lengths().and_then(|l| l.label()) {
        println!("  Sequence lengths: {}", label);
    }
    println!("{}", Table::new(rows));
}
