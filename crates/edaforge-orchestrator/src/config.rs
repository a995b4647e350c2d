//! Service configuration loading from workspace config.
//!
//! Every section is optional; missing values fall back to the defaults below.

use edaforge_cache::{CacheConfig, CacheConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Invalid cache section.
    #[error("Invalid cache configuration: {0}")]
    Cache(#[from] CacheConfigError),

    /// Configuration validation error.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Task queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Notifier settings.
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Executable per tool name, used by the command runner.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolCommandConfig>,
}

/// Configuration for the task queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of jobs that may run concurrently (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Interval for polling the queue when no wake-up arrives, in milliseconds (default: 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-invocation time limit in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,

    /// Whether cancelling a running job drops its tool invocation.
    ///
    /// Only the in-process future is dropped; termination of an external
    /// process depends on the runner.
    #[serde(default)]
    pub terminate_running_on_cancel: bool,

    /// Finished jobs kept for status queries, oldest evicted first (default: 1024).
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,
}

fn default_retained_jobs() -> usize {
    1024
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            tool_timeout_secs: None,
            terminate_running_on_cancel: false,
            retained_jobs: default_retained_jobs(),
        }
    }
}

impl QueueConfig {
    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the tool timeout as a Duration, if configured.
    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

/// Configuration for the parameter optimizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    /// Score at or above which a session converges (default: 0.95).
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Iterations without improvement before a session converges (default: 5).
    #[serde(default = "default_patience")]
    pub patience: u32,

    /// Consecutive failed iterations tolerated before a session fails (default: 3).
    #[serde(default = "default_failure_tolerance")]
    pub failure_tolerance: u32,

    /// Perturbation magnitude at the first iteration, as a fraction of each range (default: 0.3).
    #[serde(default = "default_initial_perturbation")]
    pub initial_perturbation: f64,

    /// Perturbation magnitude at the last iteration (default: 0.05).
    #[serde(default = "default_min_perturbation")]
    pub min_perturbation: f64,

    /// Candidates scored by the surrogate per proposal (default: 16).
    #[serde(default = "default_candidates_per_iteration")]
    pub candidates_per_iteration: usize,

    /// Weight of surrogate uncertainty in the acquisition function (default: 0.5).
    #[serde(default = "default_exploration_weight")]
    pub exploration_weight: f64,

    /// Parallel proposals per ensemble round (default: 3, minimum 2).
    #[serde(default = "default_ensemble_width")]
    pub ensemble_width: usize,

    /// Iteration budget used when a request does not specify one (default: 20).
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    /// Seed for reproducible proposals. `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_score_threshold() -> f64 {
    0.95
}

fn default_patience() -> u32 {
    5
}

fn default_failure_tolerance() -> u32 {
    3
}

fn default_initial_perturbation() -> f64 {
    0.3
}

fn default_min_perturbation() -> f64 {
    0.05
}

fn default_candidates_per_iteration() -> usize {
    16
}

fn default_exploration_weight() -> f64 {
    0.5
}

fn default_ensemble_width() -> usize {
    3
}

fn default_max_iterations() -> u32 {
    20
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            patience: default_patience(),
            failure_tolerance: default_failure_tolerance(),
            initial_perturbation: default_initial_perturbation(),
            min_perturbation: default_min_perturbation(),
            candidates_per_iteration: default_candidates_per_iteration(),
            exploration_weight: default_exploration_weight(),
            ensemble_width: default_ensemble_width(),
            default_max_iterations: default_max_iterations(),
            seed: None,
        }
    }
}

/// Configuration for the notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Buffered events per subscriber before events are dropped (default: 256).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

/// Configuration for the persistent store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding session history and templates.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".edaforge").join("store")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// How to launch one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommandConfig {
    /// Executable name or path.
    pub command: String,
    /// Arguments placed before the generated `--name=value` options.
    #[serde(default)]
    pub args: Vec<String>,
}

impl OrchestratorConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;

        if self.queue.workers == 0 {
            return Err(ConfigError::Validation("queue.workers must be greater than 0".to_string()));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "queue.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.queue.tool_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "queue.tool_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        let opt = &self.optimizer;
        if !(0.0..=1.0).contains(&opt.score_threshold) {
            return Err(ConfigError::Validation(
                "optimizer.score_threshold must be between 0 and 1".to_string(),
            ));
        }
        if opt.patience == 0 {
            return Err(ConfigError::Validation("optimizer.patience must be greater than 0".to_string()));
        }
        if !(opt.min_perturbation > 0.0 && opt.min_perturbation <= opt.initial_perturbation && opt.initial_perturbation <= 1.0) {
            return Err(ConfigError::Validation(
                "optimizer perturbation must satisfy 0 < min_perturbation <= initial_perturbation <= 1".to_string(),
            ));
        }
        if opt.candidates_per_iteration == 0 {
            return Err(ConfigError::Validation(
                "optimizer.candidates_per_iteration must be greater than 0".to_string(),
            ));
        }
        if opt.ensemble_width < 2 {
            return Err(ConfigError::Validation("optimizer.ensemble_width must be at least 2".to_string()));
        }
        if opt.default_max_iterations == 0 {
            return Err(ConfigError::Validation(
                "optimizer.default_max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.notifier.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "notifier.channel_capacity must be greater than 0".to_string(),
            ));
        }

        for (name, tool) in &self.tools {
            if tool.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!("tools.{name}.command must not be empty")));
            }
        }

        Ok(())
    }
}

/// Load configuration from the workspace config file.
///
/// Reads `.edaforge/config.toml` in the workspace root. A missing file yields
/// the default configuration; a relative store path is resolved against the
/// workspace root.
///
/// # Errors
/// Returns error if the file exists but cannot be read, parsed or validated.
pub fn load_config(workspace_root: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let config_path = default_config_path(workspace_root);

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str::<OrchestratorConfig>(&content)?
    } else {
        OrchestratorConfig::default()
    };

    if config.store.path.is_relative() {
        config.store.path = workspace_root.join(&config.store.path);
    }

    config.validate()?;
    Ok(config)
}

/// Get the default config file path for a workspace.
#[must_use]
pub fn default_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".edaforge").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use edaforge_cache::WritePolicy;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path()).unwrap();

        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.retained_jobs, 1024);
        assert!(config.cache.enabled);
        assert_eq!(config.optimizer.patience, 5);
        assert_eq!(config.store.path, temp.path().join(".edaforge").join("store"));
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".edaforge");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_content = r#"
[queue]
workers = 2
terminate_running_on_cancel = true
retained_jobs = 64

[cache]
max_entries = 500
write_policy = "reject_conflicting"

[optimizer]
score_threshold = 0.9
seed = 7

[tools.verilator]
command = "/opt/eda/bin/verilator"
args = ["--lint-only"]
"#;
        std::fs::write(config_dir.join("config.toml"), config_content).unwrap();

        let config = load_config(temp.path()).unwrap();
        assert_eq!(config.queue.workers, 2);
        assert!(config.queue.terminate_running_on_cancel);
        assert_eq!(config.queue.retained_jobs, 64);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.cache.write_policy, WritePolicy::RejectConflicting);
        assert!((config.optimizer.score_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.optimizer.seed, Some(7));
        assert_eq!(config.optimizer.patience, 5);
        assert_eq!(config.tools["verilator"].args, vec!["--lint-only".to_string()]);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".edaforge");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[queue]\nworkers = 0\n").unwrap();

        assert!(matches!(load_config(temp.path()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_cache_section() {
        let mut config = OrchestratorConfig::default();
        config.cache.max_entries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Cache(_))));
    }

    #[test]
    fn test_validate_optimizer_section() {
        let mut config = OrchestratorConfig::default();
        config.optimizer.ensemble_width = 1;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.optimizer.min_perturbation = 0.5;
        assert!(config.validate().is_err());
    }
}
