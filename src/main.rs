//! goodput-lens command-line entry point

use anyhow::Result;
use clap::Parser;

use llm_goodput_lens::cli::{self, Cli};
use llm_goodput_lens::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(cli.verbose, cli.quiet)?;
    cli::run(cli).await
}
