//! Command-line interface
//!
//! # Commands
//!
//! - `search` - find the highest SLO-satisfying concurrency per deployment
//! - `curve` - goodput scaling curves from stored sample tables
//! - `parse` - parse one JSON or text benchmark report
//! - `extract` - build a sample table from a results directory

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::measure::DEFAULT_REPORT_FILE;
use crate::search::GoodputMetric;

/// Goodput Lens - SLO-bounded concurrency search for LLM serving
#[derive(Parser, Debug)]
#[command(name = "goodput-lens")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "GOODPUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search for the highest concurrency that meets the SLO
    ///
    /// Examples:
    ///   goodput-lens search --profile strict
    ///   goodput-lens search --scalable ttft=4000 --fixed itl=20 --replay-dir runs/
    Search(SearchArgs),

    /// Compute goodput scaling curves from CSV sample tables
    ///
    /// Examples:
    ///   goodput-lens curve agg=agg.csv disagg=disagg.csv --profile strict
    Curve(CurveArgs),

    /// Parse a JSON or console-table benchmark report
    Parse(ParseArgs),

    /// Build a CSV sample table from a directory of JSON reports
    Extract(ExtractArgs),
}

/// SLO selection shared by `search` and `curve`
#[derive(Args, Debug, Clone, Default)]
pub struct SloArgs {
    /// Named SLO profile from the configuration file
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Scalable constraint NAME=VALUE (threshold multiplied by the scale factor)
    #[arg(long = "scalable", value_name = "NAME=VALUE")]
    pub scalable: Vec<String>,

    /// Fixed constraint NAME=VALUE
    #[arg(long = "fixed", value_name = "NAME=VALUE")]
    pub fixed: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub slo: SloArgs,

    /// Deployments to search (default: every configured deployment)
    #[arg(short, long = "deployment", value_name = "NAME")]
    pub deployments: Vec<String>,

    /// Serve stored c<N>.json / c<N>.txt reports instead of running the load generator
    #[arg(long)]
    pub replay_dir: Option<PathBuf>,

    /// First concurrency level
    #[arg(long)]
    pub start: Option<u32>,

    /// Concurrency increment
    #[arg(long)]
    pub step: Option<u32>,

    /// Consecutive misses before stopping
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Upper bound on concurrency
    #[arg(long)]
    pub max_concurrency: Option<u32>,

    /// Goodput that ranks satisfying levels: request, token or token_per_user
    #[arg(long)]
    pub goodput_metric: Option<GoodputMetric>,

    /// Per-measurement timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory for persisted reports
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Do not write reports or the summary
    #[arg(long)]
    pub no_save: bool,

    /// Keep only the newest N stored reports per deployment
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub keep: Option<u32>,
}

#[derive(Args, Debug)]
pub struct CurveArgs {
    /// Sample tables as LABEL=PATH (or PATH, labelled by file stem)
    #[arg(required = true, value_name = "LABEL=PATH")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub slo: SloArgs,

    /// Output metric per curve: `concurrency` or a `<metric>_<stat>` column
    #[arg(long = "metric", value_name = "NAME")]
    pub metrics: Vec<String>,

    /// Largest scale factor
    #[arg(long)]
    pub scale_max: Option<f64>,

    /// Smallest scale factor
    #[arg(long)]
    pub scale_min: Option<f64>,

    /// Scale factor decrement
    #[arg(long)]
    pub scale_step: Option<f64>,

    /// Persist curve reports under the output directory
    #[arg(long)]
    pub save: bool,

    /// Directory for persisted reports
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Auto,
    Json,
    Text,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Report file
    pub file: PathBuf,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Auto)]
    pub format: ReportFormat,

    /// Concurrency for JSON reports and untagged tables
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Write the parsed samples to a CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Results directory
    pub dir: PathBuf,

    /// CSV file to write
    #[arg(short, long)]
    pub output: PathBuf,

    /// Report file name to look for
    #[arg(long, default_value = DEFAULT_REPORT_FILE)]
    pub report_file: String,

    /// Deployment name written to the table
    #[arg(short, long)]
    pub deployment: Option<String>,
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config: {}", path.display()),
        None => "Failed to read configuration from the environment".to_string(),
    })?;

    match cli.command {
        Commands::Search(args) => commands::search::run(args, config, cli.json, cli.quiet).await,
        Commands::Curve(args) => commands::curve::run(args, config, cli.json, cli.quiet),
        Commands::Parse(args) => commands::parse::run(args, cli.json, cli.quiet),
        Commands::Extract(args) => commands::extract::run(args, cli.json, cli.quiet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::parse_from([
            "goodput-lens",
            "search",
            "--scalable",
            "ttft=4000",
            "--fixed",
            "itl=20",
            "--goodput-metric",
            "token",
            "-d",
            "agg",
            "--json",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.slo.scalable, vec!["ttft=4000"]);
                assert_eq!(args.slo.fixed, vec!["itl=20"]);
                assert_eq!(args.goodput_metric, Some(GoodputMetric::Token));
                assert_eq!(args.deployments, vec!["agg"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_curve_args() {
        let cli = Cli::parse_from(["goodput-lens", "curve", "agg=a.csv", "b.csv", "-p", "strict"]);
        match cli.command {
            Commands::Curve(args) => {
                assert_eq!(args.inputs, vec!["agg=a.csv", "b.csv"]);
                assert_eq!(args.slo.profile.as_deref(), Some("strict"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
