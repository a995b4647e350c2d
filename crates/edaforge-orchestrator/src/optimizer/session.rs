//! Optimization session model.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use edaforge_abstraction::{Metrics, Parameters};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// Search strategy for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Surrogate-guided local search.
    #[default]
    Bayesian,
    /// Bayesian search seeded from the most similar past project.
    TransferLearning,
    /// Several proposals per round, best one kept.
    Ensemble,
}

impl Strategy {
    /// Every supported strategy.
    pub const ALL: [Self; 3] = [Self::Bayesian, Self::TransferLearning, Self::Ensemble];

    /// Resolves a strategy name. Unknown names fall back to `Bayesian`.
    #[must_use]
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bayesian" => Self::Bayesian,
            "transfer_learning" | "transfer" => Self::TransferLearning,
            "ensemble" => Self::Ensemble,
            _ => {
                warn!(strategy = %name, "Unknown optimization strategy, using bayesian");
                Self::Bayesian
            }
        }
    }

    /// Canonical name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bayesian => "bayesian",
            Self::TransferLearning => "transfer_learning",
            Self::Ensemble => "ensemble",
        }
    }

    /// Short description for listings.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Bayesian => "Gaussian-kernel surrogate with upper-confidence-bound candidate selection",
            Self::TransferLearning => "Seeds the search from the best parameters of the most similar past project",
            Self::Ensemble => "Evaluates bayesian, transfer and exploratory proposals in parallel each round",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry returned by `list_strategies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyInfo {
    /// Strategy name.
    pub name: String,
    /// What the strategy does.
    pub description: String,
}

/// Lists the supported strategies.
#[must_use]
pub fn list_strategies() -> Vec<StrategyInfo> {
    Strategy::ALL
        .iter()
        .map(|s| StrategyInfo { name: s.as_str().to_string(), description: s.description().to_string() })
        .collect()
}

/// Declared characteristics of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Numeric attributes such as `gate_count` or `clock_mhz`.
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
    /// Categorical tags such as `asic` or `riscv`.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ProjectContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a numeric attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.tags.is_empty()
    }
}

/// Request to start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    /// Tool to tune.
    pub tool_name: String,
    /// Owning project.
    pub project_id: String,
    /// Starting parameters.
    #[serde(default)]
    pub initial_params: Parameters,
    /// Metric targets.
    pub target_metrics: Metrics,
    /// Strategy name; unknown names mean `bayesian`.
    #[serde(default)]
    pub strategy: String,
    /// Trial budget; the configured default when absent.
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Project characteristics for transfer and recommendations.
    #[serde(default)]
    pub project_context: ProjectContext,
}

impl OptimizationRequest {
    /// Creates a bayesian request with the default budget.
    pub fn new(tool_name: impl Into<String>, project_id: impl Into<String>, target_metrics: Metrics) -> Self {
        Self {
            tool_name: tool_name.into(),
            project_id: project_id.into(),
            initial_params: Parameters::new(),
            target_metrics,
            strategy: Strategy::Bayesian.as_str().to_string(),
            max_iterations: None,
            project_context: ProjectContext::default(),
        }
    }

    /// Sets the starting parameters.
    #[must_use]
    pub fn with_initial_params(mut self, params: Parameters) -> Self {
        self.initial_params = params;
        self
    }

    /// Sets the strategy name.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Sets the trial budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Sets the project context.
    #[must_use]
    pub fn with_context(mut self, context: ProjectContext) -> Self {
        self.project_context = context;
        self
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Trials are being run.
    Running,
    /// Target reached or no further improvement.
    Converged,
    /// Iteration budget used up.
    Exhausted,
    /// Too many consecutive failed trials.
    Failed,
    /// Stopped by a caller.
    Cancelled,
}

impl SessionStatus {
    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One evaluated parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Parameters evaluated.
    pub params: Parameters,
    /// Metrics observed (empty on failure).
    pub metrics: Metrics,
    /// Score in [0, 1]; 0 for failed trials.
    pub score: f64,
    /// Jobs submitted for this iteration.
    pub job_ids: Vec<String>,
    /// Failure reason, if the trial failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Proposals evaluated in this round (1 unless ensemble).
    #[serde(default = "default_candidates")]
    pub candidates_evaluated: usize,
}

fn default_candidates() -> usize {
    1
}

impl Trial {
    /// Whether the trial produced metrics.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// State of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSession {
    /// Unique identifier.
    pub session_id: String,
    /// Tool being tuned.
    pub tool_name: String,
    /// Owning project.
    pub project_id: String,
    /// Project characteristics.
    #[serde(default)]
    pub project_context: ProjectContext,
    /// Resolved strategy.
    pub strategy: Strategy,
    /// Parameters as requested.
    pub initial_params: Parameters,
    /// Parameters the first trial starts from (transfer-seeded when applicable).
    pub seed_params: Parameters,
    /// Metric targets.
    pub target_metrics: Metrics,
    /// Trial budget.
    pub max_iterations: u32,
    /// Trials recorded so far.
    pub iteration_count: u32,
    /// Best parameters seen so far.
    pub best_params: Parameters,
    /// Best score seen so far.
    pub best_score: f64,
    /// Iteration of the best trial.
    pub best_iteration: Option<u32>,
    /// Append-only trial log.
    pub trial_history: Vec<Trial>,
    /// Current status.
    pub status: SessionStatus,
    /// Why the session ended.
    pub reason: Option<String>,
    /// Machine-readable failure kind.
    pub error_kind: Option<ErrorKind>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl OptimizationSession {
    /// Creates a running session.
    #[must_use]
    pub fn new(session_id: String, request: OptimizationRequest, strategy: Strategy, max_iterations: u32) -> Self {
        Self {
            session_id,
            tool_name: request.tool_name,
            project_id: request.project_id,
            project_context: request.project_context,
            strategy,
            seed_params: request.initial_params.clone(),
            best_params: request.initial_params.clone(),
            initial_params: request.initial_params,
            target_metrics: request.target_metrics,
            max_iterations,
            iteration_count: 0,
            best_score: 0.0,
            best_iteration: None,
            trial_history: Vec::new(),
            status: SessionStatus::Running,
            reason: None,
            error_kind: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Appends a trial and updates the best result.
    ///
    /// # Returns
    /// Returns `true` if the trial improved the best score.
    pub fn record_trial(&mut self, mut trial: Trial) -> bool {
        self.iteration_count += 1;
        trial.iteration = self.iteration_count;

        let improved = trial.succeeded() && (self.best_iteration.is_none() || trial.score > self.best_score);
        if improved {
            self.best_score = trial.score;
            self.best_params = trial.params.clone();
            self.best_iteration = Some(trial.iteration);
        }
        self.trial_history.push(trial);
        improved
    }

    /// Moves the session to a terminal status.
    pub fn finish(&mut self, status: SessionStatus, reason: impl Into<String>, error_kind: Option<ErrorKind>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.reason = Some(reason.into());
        self.error_kind = error_kind;
        self.completed_at = Some(Utc::now());
    }

    /// Iterations left in the budget.
    #[must_use]
    pub fn remaining_iterations(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iteration_count)
    }
}
