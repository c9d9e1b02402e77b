//! Command implementations

pub mod curve;
pub mod extract;
pub mod parse;
pub mod search;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::cli::SloArgs;
use crate::config::Config;
use crate::slo::SloConstraints;

/// Constraints from a named profile overlaid with inline `NAME=VALUE` flags
///
/// Returns the profile name (if any) alongside the merged constraints.
pub(crate) fn build_constraints(
    args: &SloArgs,
    config: &Config,
) -> Result<(Option<String>, SloConstraints)> {
    let mut constraints = match &args.profile {
        Some(name) => config.profile(name)?.clone(),
        None => SloConstraints::new(),
    };

    for assignment in &args.scalable {
        let (name, threshold) = SloConstraints::parse_assignment(assignment)?;
        constraints.fixed.remove(&name);
        constraints.scalable.insert(name, threshold);
    }
    for assignment in &args.fixed {
        let (name, threshold) = SloConstraints::parse_assignment(assignment)?;
        constraints.scalable.remove(&name);
        constraints.fixed.insert(name, threshold);
    }

    if constraints.is_empty() {
        let profiles = config.profile_names();
        if profiles.is_empty() {
            bail!("No SLO given: pass --scalable/--fixed NAME=VALUE or configure slo_profiles");
        }
        bail!(
            "No SLO given: pass --profile (one of: {}) or --scalable/--fixed NAME=VALUE",
            profiles.join(", ")
        );
    }

    Ok((args.profile.clone(), constraints))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// `-` for unknown values
pub(crate) fn format_value(value: Option<f64>, precision: usize) -> String {
    value
        .filter(|v| v.is_finite())
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}
