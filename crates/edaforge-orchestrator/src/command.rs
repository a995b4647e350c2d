//! External process runner for EDA tools.
//!
//! Each configured tool is started as a child process with one `--name=value`
//! argument per parameter, followed by the input file paths. Metrics are read
//! from stdout lines of the form `metric <name>=<value>`.

use crate::config::ToolCommandConfig;
use async_trait::async_trait;
use edaforge_abstraction::{EdaTool, Metrics, Parameters, ToolError, ToolInputs, ToolOutput};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Number of stderr lines kept in failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// Runs tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct CommandTool {
    commands: BTreeMap<String, ToolCommandConfig>,
}

impl CommandTool {
    /// Creates a runner for the given tool commands.
    #[must_use]
    pub fn new(commands: BTreeMap<String, ToolCommandConfig>) -> Self {
        Self { commands }
    }

    /// Builds the argument list for one invocation.
    #[must_use]
    pub fn build_args(config: &ToolCommandConfig, parameters: &Parameters, inputs: &ToolInputs) -> Vec<String> {
        let mut args = config.args.clone();
        args.extend(parameters.iter().map(|(name, value)| format!("--{name}={value}")));
        args.extend(inputs.artifacts.values().map(|artifact| artifact.path.clone()));
        args
    }
}

/// Extracts `metric <name>=<value>` lines from tool output.
#[must_use]
pub fn parse_metrics(stdout: &str) -> Metrics {
    let mut metrics = Metrics::new();
    for line in stdout.lines() {
        let Some(rest) = line.trim().strip_prefix("metric ") else {
            continue;
        };
        let Some((name, value)) = rest.split_once('=') else {
            debug!(line = %line, "Ignoring malformed metric line");
            continue;
        };
        match value.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                metrics.insert(name.trim().to_string(), value);
            }
            _ => debug!(line = %line, "Ignoring non-numeric metric"),
        }
    }
    metrics
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[async_trait]
impl EdaTool for CommandTool {
    async fn run(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        inputs: &ToolInputs,
    ) -> Result<ToolOutput, ToolError> {
        let config = self.commands.get(tool_name).ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;
        let args = Self::build_args(config, parameters, inputs);
        debug!(tool = %tool_name, command = %config.command, ?args, "Spawning tool");

        let output = Command::new(&config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Spawn { tool: tool_name.to_string(), message: e.to_string() })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!(tool = %tool_name, status = %output.status, "Tool exited with failure");
            return Err(ToolError::Failed {
                tool: tool_name.to_string(),
                exit_code: output.status.code(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        let metrics = parse_metrics(&stdout);
        debug!(tool = %tool_name, metric_count = metrics.len(), "Tool finished");
        Ok(ToolOutput { metrics, raw_output: stdout })
    }

    fn runner_id(&self) -> &str {
        "command"
    }
}
