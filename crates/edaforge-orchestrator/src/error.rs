// Error types for orchestration

use edaforge_abstraction::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Unknown tool or malformed parameter set
    #[error("Invalid parameters for '{tool}': {reason}")]
    InvalidParameters {
        /// Tool name
        tool: String,
        /// Reason why parameters are invalid
        reason: String,
    },

    /// External tool failed
    #[error("Tool execution failed: {0}")]
    ToolExecution(#[from] ToolError),

    /// Unknown job, session or template
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("job", "session", "template")
        kind: &'static str,
        /// The identifier that was not found
        id: String,
    },

    /// Template name already taken for this tool
    #[error("Template '{name}' already exists for tool '{tool}'")]
    DuplicateTemplate {
        /// Tool name
        tool: String,
        /// Template name
        name: String,
    },

    /// Cache could not be used
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Job was removed from the queue before it ran
    #[error("Job {0} was cancelled")]
    Cancelled(String),

    /// Persistent store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestrationError {
    /// Shorthand for an `InvalidParameters` error.
    pub fn invalid(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters { tool: tool.into(), reason: reason.into() }
    }

    /// Returns the machine-readable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            Self::ToolExecution(_) => ErrorKind::ToolExecutionError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateTemplate { .. } => ErrorKind::DuplicateTemplate,
            Self::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Store(_) => ErrorKind::Store,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Machine-readable error kind attached to failed jobs and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected before queuing.
    InvalidParameters,
    /// The external tool failed.
    ToolExecutionError,
    /// Unknown identifier.
    NotFound,
    /// Template name collision.
    DuplicateTemplate,
    /// Cache could not be used.
    CacheUnavailable,
    /// Cancelled by a caller.
    Cancelled,
    /// Persistent store failure.
    Store,
    /// Invalid configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidParameters => "invalid_parameters",
            Self::ToolExecutionError => "tool_execution_error",
            Self::NotFound => "not_found",
            Self::DuplicateTemplate => "duplicate_template",
            Self::CacheUnavailable => "cache_unavailable",
            Self::Cancelled => "cancelled",
            Self::Store => "store",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = OrchestrationError::invalid("verilator", "unknown parameter 'foo'");
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
        assert_eq!(err.to_string(), "Invalid parameters for 'verilator': unknown parameter 'foo'");

        let err = OrchestrationError::NotFound { kind: "job", id: "job-1".to_string() };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "job not found: job-1");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ToolExecutionError).unwrap();
        assert_eq!(json, "\"tool_execution_error\"");
        assert_eq!(ErrorKind::DuplicateTemplate.to_string(), "duplicate_template");
    }
}
