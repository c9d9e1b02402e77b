//! Subprocess measurer for genai-perf style load generators
//!
//! Each run gets its own artifact directory
//! `<artifact_root>/<deployment>/c<concurrency>`, which is also the child's
//! working directory. The directory is emptied before every run so only
//! reports written by that run are collected. On Unix the child leads its
//! own process group, and a timeout kills the whole group. Argument templates may use these placeholders:
//! `{concurrency}`, `{request_count}`, `{artifact_dir}`, `{model}`, `{url}`,
//! `{tokenizer}`, `{input_tokens_mean}`, `{input_tokens_stddev}` and
//! `{output_tokens_mean}`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{MeasurementError, Measurer, RawReport, Workload};
use crate::parser::TextTableParser;

/// File name of the JSON profile export
pub const DEFAULT_REPORT_FILE: &str = "profile_export_genai_perf.json";

/// Number of trailing stderr lines kept in a [`MeasurementError::NonZeroExit`]
const STDERR_TAIL_LINES: usize = 20;

/// Configuration of the measurement subprocess
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandMeasurerConfig {
    /// Program to run
    pub program: String,
    /// Argument template
    pub args: Vec<String>,
    /// Per-run timeout in seconds; the child is killed when it expires
    pub timeout_secs: u64,
    /// Root directory for per-run artifacts
    pub artifact_root: PathBuf,
    /// Requests sent per run, as a multiple of the concurrency
    pub request_count_multiplier: u32,
    /// Report file searched for under the artifact directory
    pub report_file: String,
}

impl Default for CommandMeasurerConfig {
    fn default() -> Self {
        let args = [
            "profile",
            "-m",
            "{model}",
            "--endpoint-type",
            "chat",
            "--streaming",
            "-u",
            "{url}",
            "--synthetic-input-tokens-mean",
            "{input_tokens_mean}",
            "--synthetic-input-tokens-stddev",
            "{input_tokens_stddev}",
            "--concurrency",
            "{concurrency}",
            "--request-count",
            "{request_count}",
            "--output-tokens-mean",
            "{output_tokens_mean}",
            "--extra-inputs",
            "max_tokens:{output_tokens_mean}",
            "--extra-inputs",
            "min_tokens:{output_tokens_mean}",
            "--extra-inputs",
            "ignore_eos:true",
            "--tokenizer",
            "{tokenizer}",
            "--artifact-dir",
            "{artifact_dir}",
            "--",
            "-vv",
            "--max-threads=300",
        ];

        Self {
            program: "genai-perf".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 400,
            artifact_root: PathBuf::from("artifacts"),
            request_count_multiplier: 4,
            report_file: DEFAULT_REPORT_FILE.to_string(),
        }
    }
}

/// Runs the load generator as a child process per measurement
#[derive(Debug, Clone)]
pub struct CommandMeasurer {
    config: CommandMeasurerConfig,
}

impl CommandMeasurer {
    pub fn new(config: CommandMeasurerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandMeasurerConfig {
        &self.config
    }

    /// Artifact directory for one run
    pub fn artifact_dir(&self, concurrency: u32, workload: &Workload) -> PathBuf {
        let deployment = workload.deployment.replace([':', '/', '\\', ' '], "_");
        self.config
            .artifact_root
            .join(deployment)
            .join(format!("c{}", concurrency))
    }

    /// Substitute placeholders in the argument template
    pub fn render_args(&self, concurrency: u32, workload: &Workload, artifact_dir: &Path) -> Vec<String> {
        let request_count = concurrency.saturating_mul(self.config.request_count_multiplier.max(1));
        let values = [
            ("{concurrency}", concurrency.to_string()),
            ("{request_count}", request_count.to_string()),
            ("{artifact_dir}", artifact_dir.display().to_string()),
            ("{model}", workload.model.clone()),
            ("{url}", workload.url.clone()),
            ("{tokenizer}", workload.tokenizer_or_model().to_string()),
            ("{input_tokens_mean}", workload.input_tokens_mean.to_string()),
            ("{input_tokens_stddev}", workload.input_tokens_stddev.to_string()),
            ("{output_tokens_mean}", workload.output_tokens_mean.to_string()),
        ];

        self.config
            .args
            .iter()
            .map(|arg| {
                values
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

#[async_trait]
impl Measurer for CommandMeasurer {
    fn id(&self) -> String {
        format!("command:{}", self.config.program)
    }

    #[instrument(skip(self, workload), fields(deployment = %workload.deployment))]
    async fn measure(
        &self,
        concurrency: u32,
        workload: &Workload,
    ) -> Result<RawReport, MeasurementError> {
        let artifact_dir = absolute(self.artifact_dir(concurrency, workload));
        reset_artifact_dir(&artifact_dir).await?;

        let args = self.render_args(concurrency, workload, &artifact_dir);
        debug!(program = %self.config.program, args = ?args, "Spawning measurement");

        let mut command = Command::new(&self.config.program);
        command.args(&args);
        command.current_dir(&artifact_dir);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| MeasurementError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;
        let pid = child.id();

        let waited = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await;
        let output = match waited {
            Ok(result) => result.map_err(|source| MeasurementError::Io {
                path: artifact_dir.clone(),
                source,
            })?,
            Err(_) => {
                warn!(concurrency, timeout_secs = self.config.timeout_secs, "Measurement timed out");
                kill_process_group(pid);
                return Err(MeasurementError::Timeout {
                    concurrency,
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MeasurementError::NonZeroExit {
                code: output.status.code(),
                stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        if let Some(path) = find_newest_report(&artifact_dir, &self.config.report_file) {
            info!(concurrency, report = %path.display(), "Found report");
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| MeasurementError::Io { path, source })?;
            return Ok(RawReport::Json(content));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if has_tagged_table(&stdout, concurrency) {
            debug!(concurrency, "No report file, using console table from stdout");
            return Ok(RawReport::Text(stdout));
        }

        Err(MeasurementError::ReportMissing {
            concurrency,
            location: artifact_dir.display().to_string(),
        })
    }
}

/// Remove whatever an earlier run left behind and recreate the directory
async fn reset_artifact_dir(dir: &Path) -> Result<(), MeasurementError> {
    let io_error = |source| MeasurementError::Io {
        path: dir.to_path_buf(),
        source,
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Cleared previous artifacts"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_error)
}

/// Console output holding a table block tagged with `concurrency`
fn has_tagged_table(stdout: &str, concurrency: u32) -> bool {
    TextTableParser::new()
        .parse(stdout)
        .iter()
        .any(|sample| sample.concurrency() == concurrency)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "Killed measurement process group"),
        Err(errno) => debug!(pid, %errno, "Measurement process group already gone"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// The child runs inside the artifact directory, so relative roots are
/// anchored at our own working directory first
fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Newest file named `file_name` anywhere under `dir`
pub fn find_newest_report(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    collect_reports(dir, file_name, &mut found);
    found
        .into_iter()
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

fn collect_reports(dir: &Path, file_name: &str, found: &mut Vec<(SystemTime, PathBuf)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_reports(&path, file_name, found);
        } else if path.file_name().is_some_and(|n| n == file_name) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, path));
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
