//! Extract command implementation
//!
//! ```bash
//! goodput-lens extract results/isl3000_osl150 -o agg.csv --deployment agg
//! ```

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::info;

use super::print_json;
use crate::cli::ExtractArgs;
use crate::parser::extract_reports;
use crate::samples::SampleTable;

/// Run the extract command
pub fn run(args: ExtractArgs, json_output: bool, quiet: bool) -> Result<()> {
    let samples = extract_reports(&args.dir, &args.report_file)
        .with_context(|| format!("Failed to scan results directory: {}", args.dir.display()))?;
    if samples.is_empty() {
        bail!(
            "No {} reports under a concurrency<N> directory in {}",
            args.report_file,
            args.dir.display()
        );
    }
    info!(samples = samples.len(), dir = %args.dir.display(), "Extracted reports");

    let mut table = SampleTable::from_samples(samples);
    if let Some(name) = &args.deployment {
        table = table.with_deployment(name.clone());
    }
    table
        .write(&args.output)
        .with_context(|| format!("Failed to write CSV: {}", args.output.display()))?;

    if json_output {
        return print_json(table.samples());
    }
    if !quiet {
        let levels: Vec<String> = table
            .samples()
            .iter()
            .map(|s| s.concurrency().to_string())
            .collect();
        println!(
            "{} Extracted {} sample(s) at concurrency {}",
            "=>".bright_cyan(),
            table.len(),
            levels.join(", ")
        );
        println!(
            "{} Sample table written to: {}",
            "=>".bright_cyan(),
            args.output.display()
        );
    }
    Ok(())
}
