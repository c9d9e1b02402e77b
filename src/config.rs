//! Configuration for goodput searches and scaling curves
//!
//! Settings come from three layers, later ones winning:
//! 1. a JSON file (or the built-in defaults)
//! 2. `GOODPUT_*` environment variables
//! 3. command-line flags, applied by the CLI
//!
//! No SLO thresholds are built in; profiles must be configured.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::measure::{CommandMeasurerConfig, Workload};
use crate::scaling::{ScaleSweep, ScalingError};
use crate::search::{SearchConfig, SearchConfigError};
use crate::slo::{ColumnMap, SloConfigError, SloConstraints, SloEvaluator};

/// Environment variables read by [`Config::apply_env`]
pub const ENV_START: &str = "GOODPUT_START";
pub const ENV_STEP: &str = "GOODPUT_STEP";
pub const ENV_MAX_FAILURES: &str = "GOODPUT_MAX_FAILURES";
pub const ENV_TIMEOUT_SECS: &str = "GOODPUT_TIMEOUT_SECS";
pub const ENV_OUTPUT_DIR: &str = "GOODPUT_OUTPUT_DIR";
pub const ENV_PROGRAM: &str = "GOODPUT_PROGRAM";

/// Default directory for persisted reports
pub const DEFAULT_OUTPUT_DIR: &str = "goodput/output";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for environment variable {var}")]
    InvalidEnv { var: String, value: String },

    #[error("unknown SLO profile '{name}' (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("SLO profile '{profile}': {source}")]
    Slo {
        profile: String,
        #[source]
        source: SloConfigError,
    },

    #[error(transparent)]
    Search(#[from] SearchConfigError),

    #[error(transparent)]
    Sweep(#[from] ScalingError),

    #[error("invalid measurement settings: {0}")]
    Measurement(String),
}

/// A deployment to search, overriding the shared workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokenizer: Option<String>,
}

impl DeploymentConfig {
    /// The shared workload with this deployment's overrides applied
    pub fn workload(&self, base: &Workload) -> Workload {
        let mut workload = base.clone().for_deployment(self.name.clone());
        if let Some(url) = &self.url {
            workload.url = url.clone();
        }
        if let Some(model) = &self.model {
            workload.model = model.clone();
        }
        if let Some(tokenizer) = &self.tokenizer {
            workload.tokenizer = tokenizer.clone();
        }
        workload
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named SLO constraint sets
    pub slo_profiles: BTreeMap<String, SloConstraints>,
    /// Extra name-to-field mappings, layered over the built-in aliases
    pub column_map: ColumnMap,
    pub search: SearchConfig,
    pub sweep: ScaleSweep,
    pub measurement: CommandMeasurerConfig,
    pub workload: Workload,
    pub deployments: Vec<DeploymentConfig>,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slo_profiles: BTreeMap::new(),
            column_map: ColumnMap::empty(),
            search: SearchConfig::default(),
            sweep: ScaleSweep::default(),
            measurement: CommandMeasurerConfig::default(),
            workload: Workload::default(),
            deployments: Vec::new(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl Config {
    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else start from defaults; then apply the environment
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `GOODPUT_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overlay variables from an arbitrary lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                })
        }

        if let Some(v) = lookup(ENV_START) {
            self.search.start = parsed(ENV_START, v)?;
        }
        if let Some(v) = lookup(ENV_STEP) {
            self.search.step = parsed(ENV_STEP, v)?;
        }
        if let Some(v) = lookup(ENV_MAX_FAILURES) {
            self.search.max_failures = parsed(ENV_MAX_FAILURES, v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_SECS) {
            self.measurement.timeout_secs = parsed(ENV_TIMEOUT_SECS, v)?;
        }
        if let Some(v) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_PROGRAM) {
            self.measurement.program = v;
        }
        Ok(())
    }

    /// Built-in aliases overlaid with the configured column map
    pub fn columns(&self) -> ColumnMap {
        let mut columns = ColumnMap::default();
        columns.extend(&self.column_map);
        columns
    }

    /// Look up a named SLO profile
    pub fn profile(&self, name: &str) -> Result<&SloConstraints, ConfigError> {
        self.slo_profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.profile_names().join(", "),
            })
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.slo_profiles.keys().cloned().collect()
    }

    /// Check every section before any measurement runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;
        self.sweep.validate()?;

        if self.measurement.program.trim().is_empty() {
            return Err(ConfigError::Measurement("program is empty".to_string()));
        }
        if self.measurement.timeout_secs == 0 {
            return Err(ConfigError::Measurement(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let columns = self.columns();
        for (name, constraints) in &self.slo_profiles {
            SloEvaluator::new(constraints, &columns).map_err(|source| ConfigError::Slo {
                profile: name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{MetricField, StatKind};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "slo_profiles": {
            "strict": {"scalable": {"ttft": 4000}, "fixed": {"tpot": 40}}
        },
        "column_map": {"queue": {"metric": "queue_time", "stat": "p99"}},
        "search": {"step": 5},
        "deployments": [{"name": "agg", "url": "http://agg:8000"}]
    }"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.slo_profiles.is_empty());
        assert_eq!(config.search.step, 10);
        assert_eq!(config.sweep.scale_max, 5.0);
        assert_eq!(config.measurement.timeout_secs, 400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, CONFIG).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.search.step, 5);
        assert_eq!(config.search.start, 1);
        assert_eq!(config.profile("strict").unwrap().fixed.get("tpot"), Some(&40.0));
        assert!(config.validate().is_ok());

        let columns = config.columns();
        assert_eq!(
            columns.resolve("queue"),
            Some(MetricField::new("queue_time", StatKind::P99))
        );
        assert!(columns.resolve("ttft").is_some());

        let workload = config.deployments[0].workload(&config.workload);
        assert_eq!(workload.deployment, "agg");
        assert_eq!(workload.url, "http://agg:8000");
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_profile() {
        let config: Config = serde_json::from_str(CONFIG).unwrap();
        let err = config.profile("loose").unwrap_err();
        assert!(err.to_string().contains("strict"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_START, "2"),
            (ENV_MAX_FAILURES, "5"),
            (ENV_TIMEOUT_SECS, "60"),
            (ENV_PROGRAM, "/usr/bin/genai-perf"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_from(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.search.start, 2);
        assert_eq!(config.search.step, 10);
        assert_eq!(config.search.max_failures, 5);
        assert_eq!(config.measurement.timeout_secs, 60);
        assert_eq!(config.measurement.program, "/usr/bin/genai-perf");
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|var| (var == ENV_STEP).then(|| "ten".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == ENV_STEP));
    }

    #[test]
    fn test_validate_rejects_bad_profile() {
        let mut config = Config::default();
        config.slo_profiles.insert(
            "broken".to_string(),
            SloConstraints::new().with_scalable("nonsense", 1.0),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Slo { ref profile, .. }) if profile == "broken"
        ));

        let mut config = Config::default();
        config.search.step = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Search(_))));

        let mut config = Config::default();
        config.measurement.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Measurement(_))));
    }
}
