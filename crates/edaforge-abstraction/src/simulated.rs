//! Deterministic stand-in for real EDA tools.
//!
//! `SimulatedTool` maps a parameter set to plausible metrics with a closed-form
//! model so that the queue and optimizer can be exercised without tool binaries.

use crate::{EdaTool, Metrics, ParamValue, Parameters, ToolError, ToolInputs, ToolOutput};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Simulated tool runner.
#[derive(Debug, Default)]
pub struct SimulatedTool {
    delay: Duration,
    failing_tools: HashSet<String>,
    invocations: AtomicUsize,
}

impl SimulatedTool {
    /// Creates a simulated runner with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial run time to every invocation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes every run of `tool_name` fail.
    #[must_use]
    pub fn failing(mut self, tool_name: impl Into<String>) -> Self {
        self.failing_tools.insert(tool_name.into());
        self
    }

    /// Number of runs started so far.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Computes the metrics for a parameter set.
    #[must_use]
    pub fn evaluate(tool_name: &str, parameters: &Parameters) -> Metrics {
        let opt = numeric(parameters, "optimization_level").unwrap_or(1.0).max(0.0);
        let threads = numeric(parameters, "threads").unwrap_or(1.0).max(1.0);
        let enabled_flags = parameters.values().filter(|v| matches!(v, ParamValue::Bool(true))).count();
        let other: f64 = parameters
            .iter()
            .filter(|(k, _)| k.as_str() != "optimization_level" && k.as_str() != "threads")
            .filter_map(|(_, v)| v.as_f64())
            .map(|v| v.abs() * 0.01)
            .sum();
        let jitter = jitter(tool_name, parameters);

        let mut metrics = Metrics::new();
        metrics.insert(
            "execution_time".to_string(),
            180.0 / (1.0 + opt) / threads.sqrt() + other - enabled_flags as f64 + 2.0 * jitter,
        );
        metrics.insert("memory_usage".to_string(), 250.0 + 60.0 * opt + 35.0 * threads + 5.0 * jitter);
        metrics.insert("area".to_string(), 1200.0 - 40.0 * opt + other * 10.0 + 3.0 * jitter);
        metrics.insert("power".to_string(), 2.0 + 0.15 * threads + 0.05 * opt + 0.01 * jitter);
        metrics
    }
}

fn numeric(parameters: &Parameters, name: &str) -> Option<f64> {
    parameters.get(name).and_then(ParamValue::as_f64)
}

/// Deterministic value in [-1, 1] derived from the tool and parameters.
fn jitter(tool_name: &str, parameters: &Parameters) -> f64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    for (k, v) in parameters {
        hasher.update(k.as_bytes());
        hasher.update(v.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let raw = u16::from_be_bytes([digest[0], digest[1]]);
    f64::from(raw) / f64::from(u16::MAX) * 2.0 - 1.0
}

#[async_trait]
impl EdaTool for SimulatedTool {
    async fn run(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        inputs: &ToolInputs,
    ) -> Result<ToolOutput, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        debug!(
            tool = %tool_name,
            parameter_count = parameters.len(),
            inputs = %inputs.fingerprint(),
            "SimulatedTool running"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing_tools.contains(tool_name) {
            return Err(ToolError::Failed {
                tool: tool_name.to_string(),
                exit_code: Some(1),
                stderr: "simulated failure".to_string(),
            });
        }

        let metrics = Self::evaluate(tool_name, parameters);
        let mut raw_output = String::new();
        for (name, value) in &metrics {
            let _ = writeln!(raw_output, "metric {name}={value:.4}");
        }

        Ok(ToolOutput { metrics, raw_output })
    }

    fn runner_id(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(opt: i64) -> Parameters {
        let mut p = Parameters::new();
        p.insert("optimization_level".to_string(), ParamValue::Int(opt));
        p
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let a = SimulatedTool::evaluate("verilator", &params(2));
        let b = SimulatedTool::evaluate("verilator", &params(2));
        assert_eq!(a, b);
        assert!(a.contains_key("execution_time"));
        assert!(a.contains_key("memory_usage"));
    }

    #[test]
    fn test_higher_optimization_runs_faster() {
        let slow = SimulatedTool::evaluate("verilator", &params(0));
        let fast = SimulatedTool::evaluate("verilator", &params(3));
        assert!(fast["execution_time"] < slow["execution_time"]);
        assert!(fast["memory_usage"] > slow["memory_usage"]);
    }

    #[tokio::test]
    async fn test_run_counts_invocations_and_fails_on_request() {
        let tool = SimulatedTool::new().failing("yosys");

        let ok = tool.run("verilator", &params(1), &ToolInputs::new()).await.unwrap();
        assert!(ok.raw_output.contains("metric execution_time="));

        let err = tool.run("yosys", &params(1), &ToolInputs::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
        assert_eq!(tool.invocations(), 2);
    }
}
