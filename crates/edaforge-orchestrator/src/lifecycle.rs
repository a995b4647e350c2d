//! Job lifecycle.
//!
//! A job moves strictly forward through `Queued → Running → {Succeeded, Failed}`.
//! Every accepted transition is recorded so callers can audit the sequence.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use edaforge_abstraction::{Parameters, ToolInputs, ToolOutput};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// A worker is executing the job.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Checks if the job can transition to the given status.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        matches!((self, to), (Self::Queued, Self::Running) | (Self::Running, Self::Succeeded | Self::Failed))
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Scheduling priority (higher runs first).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work such as optimizer trials.
    Batch,
    /// Regular submissions.
    #[default]
    Normal,
    /// User-facing requests.
    Interactive,
}

/// A request to run one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Tool to run.
    pub tool_name: String,
    /// Tool options.
    #[serde(default)]
    pub parameters: Parameters,
    /// Owning project.
    pub project_id: String,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Input artifacts.
    #[serde(default)]
    pub inputs: ToolInputs,
}

impl JobRequest {
    /// Creates a request with normal priority and no input artifacts.
    pub fn new(tool_name: impl Into<String>, parameters: Parameters, project_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            project_id: project_id.into(),
            priority: Priority::Normal,
            inputs: ToolInputs::default(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the input artifacts.
    #[must_use]
    pub fn with_inputs(mut self, inputs: ToolInputs) -> Self {
        self.inputs = inputs;
        self
    }
}

/// A job and its observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: String,
    /// Tool to run.
    pub tool_name: String,
    /// Tool options.
    pub parameters: Parameters,
    /// Owning project.
    pub project_id: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Input artifacts.
    pub inputs: ToolInputs,
    /// Current status.
    pub status: JobStatus,
    /// Every status the job has held, in order.
    pub transitions: Vec<JobStatus>,
    /// When the job was accepted.
    pub submitted_at: DateTime<Utc>,
    /// When a worker picked it up.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Tool output on success.
    pub result: Option<ToolOutput>,
    /// Whether the result came from the cache.
    pub cache_hit: bool,
    /// Machine-readable failure kind.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure reason.
    pub reason: Option<String>,
}

impl Job {
    /// Creates a queued job from a request.
    #[must_use]
    pub fn new(job_id: String, request: JobRequest) -> Self {
        Self {
            job_id,
            tool_name: request.tool_name,
            parameters: request.parameters,
            project_id: request.project_id,
            priority: request.priority,
            inputs: request.inputs,
            status: JobStatus::Queued,
            transitions: vec![JobStatus::Queued],
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            cache_hit: false,
            error_kind: None,
            reason: None,
        }
    }

    /// Moves the job to `to`, stamping the matching timestamp.
    ///
    /// # Errors
    /// Returns the current status if the transition is not allowed.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), JobStatus> {
        if !self.status.can_transition_to(to) {
            return Err(self.status);
        }
        match to {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Succeeded | JobStatus::Failed => self.completed_at = Some(Utc::now()),
            JobStatus::Queued => {}
        }
        self.status = to;
        self.transitions.push(to);
        Ok(())
    }

    /// Marks the job succeeded.
    ///
    /// # Errors
    /// Returns the current status if the job is not running.
    pub fn succeed(&mut self, result: ToolOutput, cache_hit: bool) -> Result<(), JobStatus> {
        self.transition(JobStatus::Succeeded)?;
        self.result = Some(result);
        self.cache_hit = cache_hit;
        Ok(())
    }

    /// Marks the job failed.
    ///
    /// # Errors
    /// Returns the current status if the job is not running.
    pub fn fail(&mut self, kind: ErrorKind, reason: impl Into<String>) -> Result<(), JobStatus> {
        self.transition(JobStatus::Failed)?;
        self.error_kind = Some(kind);
        self.reason = Some(reason.into());
        Ok(())
    }
}
