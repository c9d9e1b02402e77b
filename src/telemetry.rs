//! Logging setup for the command-line tool
//!
//! `RUST_LOG` takes precedence when set; otherwise the level follows the
//! `--verbose` / `--quiet` flags.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a given verbosity
pub fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "warn"
    } else if verbose {
        "llm_goodput_lens=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber; a second call is a no-op
pub fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let fallback = EnvFilter::new(default_filter(verbose, quiet));
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(fallback)
    } else {
        fallback
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stderr);

    // try_init fails only if a subscriber is already installed
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_parse() {
        for (verbose, quiet) in [(false, false), (true, false), (false, true), (true, true)] {
            assert!(EnvFilter::try_new(default_filter(verbose, quiet)).is_ok());
        }
        assert_eq!(default_filter(true, true), "warn");
    }

    #[test]
    fn test_init_twice() {
        assert!(init_logging(false, true).is_ok());
        assert!(init_logging(true, false).is_ok());
    }
}
