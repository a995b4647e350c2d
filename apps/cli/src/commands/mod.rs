//! Command implementations for the EDAForge CLI.

pub mod health;
pub mod optimize;
pub mod recommend;
pub mod run;
pub mod strategies;
pub mod template;

use anyhow::{Context as _, bail};
use edaforge_abstraction::{Metrics, ParamValue, Parameters, SimulatedTool, ToolInputs};
use edaforge_orchestrator::{EdaService, JsonFileStore, ProjectContext, load_config};
use std::path::PathBuf;
use std::sync::Arc;

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub workspace: PathBuf,
    pub simulate: bool,
}

impl Context {
    /// Loads the workspace config and starts a service.
    pub fn start_service(&self) -> anyhow::Result<EdaService> {
        let config = load_config(&self.workspace)
            .with_context(|| format!("failed to load config from {}", self.workspace.display()))?;

        let service = if self.simulate {
            let store = Arc::new(JsonFileStore::new(config.store.path.clone()));
            EdaService::new(config, Arc::new(SimulatedTool::new()), store)?
        } else {
            EdaService::from_config(config)?
        };
        service.start();
        Ok(service)
    }
}

fn split_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("expected NAME=VALUE, got '{raw}'"),
    }
}

/// Interprets a command-line value as bool, int, float or text, in that order.
pub fn parse_value(raw: &str) -> ParamValue {
    match raw {
        "true" => ParamValue::Bool(true),
        "false" => ParamValue::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(ParamValue::Int)
            .or_else(|_| raw.parse::<f64>().map(ParamValue::Float))
            .unwrap_or_else(|_| ParamValue::Text(raw.to_string())),
    }
}

/// Parses `NAME=VALUE` tool parameters.
pub fn parse_params(raw: &[String]) -> anyhow::Result<Parameters> {
    raw.iter()
        .map(|item| split_pair(item).map(|(name, value)| (name.to_string(), parse_value(value))))
        .collect()
}

/// Reads `NAME=PATH` input files and digests their contents.
pub async fn parse_inputs(raw: &[String]) -> anyhow::Result<ToolInputs> {
    let mut inputs = ToolInputs::new();
    for item in raw {
        let (name, path) = split_pair(item)?;
        inputs.add_file(name, path).await.with_context(|| format!("failed to read input '{name}' at {path}"))?;
    }
    Ok(inputs)
}

/// Parses `NAME=VALUE` numeric pairs.
pub fn parse_numbers(raw: &[String]) -> anyhow::Result<Metrics> {
    raw.iter()
        .map(|item| {
            let (name, value) = split_pair(item)?;
            let number = value.parse::<f64>().with_context(|| format!("'{name}' needs a numeric value"))?;
            Ok((name.to_string(), number))
        })
        .collect()
}

/// Builds a project context from tags and `NAME=VALUE` attributes.
pub fn parse_context(tags: &[String], attributes: &[String]) -> anyhow::Result<ProjectContext> {
    let mut context = ProjectContext::new();
    for tag in tags {
        context = context.with_tag(tag.trim());
    }
    for (name, value) in parse_numbers(attributes)? {
        context = context.with_attribute(name, value);
    }
    Ok(context)
}

/// Formats parameters as `name=value` pairs.
pub fn format_params(params: &Parameters) -> String {
    if params.is_empty() {
        return "(defaults)".to_string();
    }
    params.iter().map(|(name, value)| format!("{name}={value}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_types() {
        assert_eq!(parse_value("true"), ParamValue::Bool(true));
        assert_eq!(parse_value("3"), ParamValue::Int(3));
        assert_eq!(parse_value("0.65"), ParamValue::Float(0.65));
        assert_eq!(parse_value("sv"), ParamValue::Text("sv".to_string()));
    }

    #[test]
    fn test_parse_params_rejects_missing_value_separator() {
        assert!(parse_params(&["optimization_level".to_string()]).is_err());
        assert!(parse_params(&["=3".to_string()]).is_err());

        let params = parse_params(&["optimization_level=2".to_string(), "trace=false".to_string()]).unwrap();
        assert_eq!(params.get("optimization_level"), Some(&ParamValue::Int(2)));
        assert_eq!(params.get("trace"), Some(&ParamValue::Bool(false)));
    }

    #[test]
    fn test_parse_numbers_requires_numbers() {
        assert!(parse_numbers(&["area=small".to_string()]).is_err());
        let metrics = parse_numbers(&["area=1000".to_string()]).unwrap();
        assert_eq!(metrics.get("area"), Some(&1000.0));
    }

    #[tokio::test]
    async fn test_parse_inputs_reads_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let rtl = dir.path().join("top.v");
        std::fs::write(&rtl, "module top; endmodule\n").unwrap();

        let inputs = parse_inputs(&[format!("top={}", rtl.display())]).await.unwrap();
        assert_eq!(inputs.artifacts["top"].path, rtl.display().to_string());
        assert_eq!(inputs.artifacts["top"].digest.len(), 64);

        let missing = format!("top={}", dir.path().join("missing.v").display());
        assert!(parse_inputs(&[missing]).await.is_err());
    }

    #[test]
    fn test_parse_context() {
        let context = parse_context(&["asic".to_string()], &["gate_count=5000".to_string()]).unwrap();
        assert!(context.tags.contains("asic"));
        assert_eq!(context.attributes.get("gate_count"), Some(&5000.0));
    }
}
