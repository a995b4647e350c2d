//! Tool abstraction layer for EDAForge.
//!
//! This module defines the core traits and types for invoking external EDA tools.
//! Every tool is treated as an opaque function from a parameter set (plus input
//! artifacts) to a set of numeric metrics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod simulated;

pub use simulated::SimulatedTool;

/// Represents an error that can occur when invoking an EDA tool.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolError {
    /// The runner has no way to execute the named tool.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The tool process could not be started.
    #[error("Failed to spawn '{tool}': {message}")]
    Spawn {
        /// The tool name.
        tool: String,
        /// Underlying spawn error.
        message: String,
    },

    /// The tool ran but reported failure.
    #[error("Tool '{tool}' failed{}: {stderr}", exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    Failed {
        /// The tool name.
        tool: String,
        /// Process exit code, if the tool exited normally.
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Tail of the tool's diagnostic output.
        stderr: String,
    },

    /// The tool did not finish within the configured time limit.
    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout {
        /// The tool name.
        tool: String,
        /// Timeout in seconds.
        secs: u64,
    },

    /// The tool output could not be interpreted.
    #[error("Invalid tool output: {0}")]
    InvalidOutput(String),
}

/// A single tool option value.
///
/// Deserialization is untagged so plain JSON/TOML literals map directly:
/// `true` → `Bool`, `2` → `Int`, `2.5` → `Float`, `"sv"` → `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer option.
    Int(i64),
    /// Floating point option.
    Float(f64),
    /// String or enumerated option.
    Text(String),
}

impl ParamValue {
    /// Returns the value as `f64` if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Returns the value as a string slice if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the value's type, used in validation messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Tool options keyed by option name.
///
/// A `BTreeMap` keeps iteration order stable, which the cache relies on when
/// building canonical keys.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Metric values reported by a tool run, keyed by metric name.
pub type Metrics = BTreeMap<String, f64>;

/// One input file of a tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArtifact {
    /// Location handed to the tool.
    pub path: String,
    /// Hex SHA-256 of the file contents.
    pub digest: String,
}

/// Hex SHA-256 digest of `bytes`.
#[must_use]
pub fn content_digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    format!("{:x}", Sha256::digest(bytes))
}

/// Input artifacts for a tool run, keyed by logical name.
///
/// Only names and content digests enter the fingerprint, so an edited file
/// changes the cache key while a moved one does not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInputs {
    /// Artifacts keyed by logical name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, InputArtifact>,
}

impl ToolInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artifact whose digest is already known.
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<String>, digest: impl Into<String>) -> Self {
        self.artifacts.insert(name.into(), InputArtifact { path: path.into(), digest: digest.into() });
        self
    }

    /// Reads `path` and adds it under `name` with the digest of its contents.
    ///
    /// # Errors
    /// Returns the I/O error if the file cannot be read.
    pub async fn add_file(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let artifact = InputArtifact { path: path.display().to_string(), digest: content_digest(&bytes) };
        self.artifacts.insert(name.into(), artifact);
        Ok(())
    }

    /// Returns a deterministic SHA-256 fingerprint over artifact names and digests.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        if self.artifacts.is_empty() {
            return "no-inputs".to_string();
        }

        let mut hasher = Sha256::new();
        for (name, artifact) in &self.artifacts {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(artifact.digest.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The result of a successful tool run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Metrics extracted from the run.
    pub metrics: Metrics,
    /// Captured standard output.
    pub raw_output: String,
}

impl ToolOutput {
    /// Creates an output from metrics with empty raw output.
    #[must_use]
    pub fn from_metrics(metrics: Metrics) -> Self {
        Self { metrics, raw_output: String::new() }
    }
}

/// A trait for invoking EDA tools.
///
/// All runners must be `Send + Sync` to allow concurrent use across workers.
#[async_trait]
pub trait EdaTool: Send + Sync {
    /// Runs `tool_name` with the given parameters and inputs.
    ///
    /// # Errors
    /// Returns a `ToolError` if the tool cannot be started, fails, or produces
    /// output that cannot be interpreted.
    async fn run(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        inputs: &ToolInputs,
    ) -> Result<ToolOutput, ToolError>;

    /// Returns an identifier for this runner (used in logs).
    fn runner_id(&self) -> &str;
}
