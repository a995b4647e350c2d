//! Tool registry for known EDA tools and their parameter schemas.
//!
//! Every job and optimization request is validated against the registry before
//! anything is queued.

use crate::error::{OrchestrationError, Result};
use edaforge_abstraction::{ParamValue, Parameters};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Schema of one tool option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamSpec {
    /// Integer within an inclusive range.
    Int {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },
    /// Float within an inclusive range.
    Float {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Boolean flag.
    Bool,
    /// One of a fixed set of strings.
    Choice {
        /// Allowed values.
        values: Vec<String>,
    },
}

impl ParamSpec {
    /// Convenience constructor for `Choice`.
    pub fn choice(values: &[&str]) -> Self {
        Self::Choice { values: values.iter().map(|v| (*v).to_string()).collect() }
    }

    /// Checks a value against this schema.
    ///
    /// Integral floats are accepted for integer options.
    pub fn check(&self, value: &ParamValue) -> std::result::Result<(), String> {
        match (self, value) {
            (Self::Int { min, max }, ParamValue::Int(v)) => in_range(*v as f64, *min as f64, *max as f64),
            (Self::Int { min, max }, ParamValue::Float(v)) if v.fract() == 0.0 => {
                in_range(*v, *min as f64, *max as f64)
            }
            (Self::Float { min, max }, v @ (ParamValue::Int(_) | ParamValue::Float(_))) => {
                let v = v.as_f64().unwrap_or(f64::NAN);
                if v.is_finite() { in_range(v, *min, *max) } else { Err("must be finite".to_string()) }
            }
            (Self::Bool, ParamValue::Bool(_)) => Ok(()),
            (Self::Choice { values }, ParamValue::Text(s)) => {
                if values.iter().any(|allowed| allowed == s) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not one of [{}]", values.join(", ")))
                }
            }
            (spec, value) => Err(format!("expected {}, got {}", spec.type_name(), value.type_name())),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::Bool => "bool",
            Self::Choice { .. } => "string",
        }
    }

    /// Maps a value onto [0, 1] for distance computations.
    #[must_use]
    pub fn normalize(&self, value: &ParamValue) -> f64 {
        let unit = match (self, value) {
            (Self::Int { min, max }, v) => span(v.as_f64(), *min as f64, *max as f64),
            (Self::Float { min, max }, v) => span(v.as_f64(), *min, *max),
            (Self::Bool, ParamValue::Bool(b)) => f64::from(u8::from(*b)),
            (Self::Choice { values }, ParamValue::Text(s)) => match values.iter().position(|v| v == s) {
                Some(i) if values.len() > 1 => i as f64 / (values.len() - 1) as f64,
                _ => 0.5,
            },
            _ => 0.5,
        };
        unit.clamp(0.0, 1.0)
    }

    /// Forces a value into the schema's range, converting numeric types if needed.
    ///
    /// Returns `None` when the value cannot be represented (e.g. text for an int).
    #[must_use]
    pub fn clamp(&self, value: &ParamValue) -> Option<ParamValue> {
        match self {
            Self::Int { min, max } => {
                value.as_f64().filter(|v| v.is_finite()).map(|v| ParamValue::Int((v.round() as i64).clamp(*min, *max)))
            }
            Self::Float { min, max } => {
                value.as_f64().filter(|v| v.is_finite()).map(|v| ParamValue::Float(v.clamp(*min, *max)))
            }
            Self::Bool | Self::Choice { .. } => self.check(value).ok().map(|()| value.clone()),
        }
    }

    /// Midpoint of the range, `false`, or the first choice.
    #[must_use]
    pub fn default_value(&self) -> ParamValue {
        match self {
            Self::Int { min, max } => ParamValue::Int(min + (max - min) / 2),
            Self::Float { min, max } => ParamValue::Float(min + (max - min) / 2.0),
            Self::Bool => ParamValue::Bool(false),
            Self::Choice { values } => values.first().map_or(ParamValue::Text(String::new()), |v| ParamValue::Text(v.clone())),
        }
    }

    /// Draws a neighbour of `value`.
    ///
    /// `scale` is the perturbation magnitude as a fraction of the range. Flags
    /// and choices change with probability `scale / 2`.
    pub fn perturb<R: Rng + ?Sized>(&self, value: &ParamValue, scale: f64, rng: &mut R) -> ParamValue {
        let scale = scale.clamp(0.0, 1.0);
        match self {
            Self::Int { min, max } => {
                let current = value.as_f64().unwrap_or(*min as f64);
                let range = (*max - *min) as f64;
                let delta = rng.gen_range(-1.0..=1.0) * scale * range;
                let mut next = (current + delta).round() as i64;
                if next == current.round() as i64 && range > 0.0 && rng.gen_bool(scale) {
                    next += if rng.gen_bool(0.5) { 1 } else { -1 };
                }
                ParamValue::Int(next.clamp(*min, *max))
            }
            Self::Float { min, max } => {
                let current = value.as_f64().unwrap_or(*min);
                let delta = rng.gen_range(-1.0..=1.0) * scale * (max - min);
                ParamValue::Float((current + delta).clamp(*min, *max))
            }
            Self::Bool => match value {
                ParamValue::Bool(b) if rng.gen_bool(scale / 2.0) => ParamValue::Bool(!b),
                other => other.clone(),
            },
            Self::Choice { values } => {
                if !values.is_empty() && rng.gen_bool(scale / 2.0) {
                    ParamValue::Text(values[rng.gen_range(0..values.len())].clone())
                } else {
                    value.clone()
                }
            }
        }
    }
}

fn in_range(v: f64, min: f64, max: f64) -> std::result::Result<(), String> {
    if v < min || v > max {
        Err(format!("{v} is outside [{min}, {max}]"))
    } else {
        Ok(())
    }
}

fn span(v: Option<f64>, min: f64, max: f64) -> f64 {
    match v {
        Some(v) if max > min => (v - min) / (max - min),
        _ => 0.5,
    }
}

/// Description of a tool and the options it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name used in requests.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Accepted options.
    pub parameters: BTreeMap<String, ParamSpec>,
}

impl ToolSpec {
    /// Creates a tool spec without parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), parameters: BTreeMap::new() }
    }

    /// Adds a parameter schema.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Validates a full parameter set.
    pub fn validate(&self, parameters: &Parameters) -> Result<()> {
        for (name, value) in parameters {
            if name.trim().is_empty() {
                return Err(OrchestrationError::invalid(&self.name, "parameter names must not be empty"));
            }
            let Some(spec) = self.parameters.get(name) else {
                return Err(OrchestrationError::invalid(&self.name, format!("unknown parameter '{name}'")));
            };
            spec.check(value)
                .map_err(|reason| OrchestrationError::invalid(&self.name, format!("parameter '{name}': {reason}")))?;
        }
        Ok(())
    }

    /// Normalized feature vector over every declared parameter (missing → 0.5).
    #[must_use]
    pub fn features(&self, parameters: &Parameters) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|(name, spec)| parameters.get(name).map_or(0.5, |v| spec.normalize(v)))
            .collect()
    }
}

/// Registry for managing tool specs.
pub struct ToolRegistry {
    /// Map of tool name to spec.
    tools: Arc<RwLock<HashMap<String, Arc<ToolSpec>>>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.try_read().map(|t| t.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { tools: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Creates a registry pre-populated with the built-in tool specs.
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let map = builtin_tools().into_iter().map(|spec| (spec.name.clone(), Arc::new(spec))).collect();
        Self { tools: Arc::new(RwLock::new(map)) }
    }

    /// Registers a tool spec.
    ///
    /// # Returns
    /// Returns `true` if the tool was newly registered, `false` if it replaced an existing spec.
    pub async fn register(&self, spec: ToolSpec) -> bool {
        let name = spec.name.clone();
        debug!(tool = %name, "Registering tool");

        let mut tools = self.tools.write().await;
        let was_new = tools.insert(name.clone(), Arc::new(spec)).is_none();
        if !was_new {
            warn!(tool = %name, "Tool spec replaced in registry");
        }
        was_new
    }

    /// Retrieves a tool spec by name.
    pub async fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Lists all registered tools, sorted by name.
    pub async fn list(&self) -> Vec<Arc<ToolSpec>> {
        let mut specs: Vec<_> = self.tools.read().await.values().cloned().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Validates a tool name and parameter set.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for an empty or unknown tool name, unknown
    /// parameters, wrong types, or out-of-range values.
    pub async fn validate(&self, tool_name: &str, parameters: &Parameters) -> Result<Arc<ToolSpec>> {
        if tool_name.trim().is_empty() {
            return Err(OrchestrationError::invalid(tool_name, "tool name must not be empty"));
        }
        let spec = self
            .get(tool_name)
            .await
            .ok_or_else(|| OrchestrationError::invalid(tool_name, "unknown tool"))?;
        spec.validate(parameters)?;
        Ok(spec)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtin_tools()
    }
}

/// Built-in tool specs.
#[must_use]
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("verilator", "Verilog/SystemVerilog simulator")
            .with_param("optimization_level", ParamSpec::Int { min: 0, max: 3 })
            .with_param("threads", ParamSpec::Int { min: 1, max: 64 })
            .with_param("language_extensions", ParamSpec::choice(&["v2001", "v2005", "sv", "sv2012", "sv2017"]))
            .with_param("trace", ParamSpec::Bool)
            .with_param("x_assign", ParamSpec::choice(&["0", "1", "fast", "unique"]))
            .with_param("unroll_count", ParamSpec::Int { min: 1, max: 1024 })
            .with_param("output_split", ParamSpec::Int { min: 0, max: 100_000 }),
        ToolSpec::new("iverilog", "Icarus Verilog simulator")
            .with_param("optimization_level", ParamSpec::Int { min: 0, max: 3 })
            .with_param("generation", ParamSpec::choice(&["2001", "2005", "2009", "2012"]))
            .with_param("warnings_all", ParamSpec::Bool),
        ToolSpec::new("yosys", "Logic synthesis")
            .with_param("optimization_level", ParamSpec::Int { min: 0, max: 3 })
            .with_param("target", ParamSpec::choice(&["asic", "ice40", "ecp5", "xilinx", "gowin"]))
            .with_param("flatten", ParamSpec::Bool)
            .with_param("abc_optimization", ParamSpec::Bool)
            .with_param("retime", ParamSpec::Bool)
            .with_param("max_fanout", ParamSpec::Int { min: 1, max: 256 }),
        ToolSpec::new("nextpnr", "FPGA place and route")
            .with_param("placer", ParamSpec::choice(&["heap", "sa"]))
            .with_param("router", ParamSpec::choice(&["router1", "router2"]))
            .with_param("seed", ParamSpec::Int { min: 0, max: 1_000_000 })
            .with_param("freq_mhz", ParamSpec::Float { min: 1.0, max: 1000.0 })
            .with_param("placer_effort", ParamSpec::Float { min: 0.1, max: 10.0 })
            .with_param("threads", ParamSpec::Int { min: 1, max: 64 }),
        ToolSpec::new("openroad", "ASIC place and route")
            .with_param("optimization_level", ParamSpec::Int { min: 0, max: 3 })
            .with_param("core_utilization", ParamSpec::Float { min: 0.1, max: 0.9 })
            .with_param("place_density", ParamSpec::Float { min: 0.1, max: 1.0 })
            .with_param("clock_period_ns", ParamSpec::Float { min: 0.1, max: 100.0 })
            .with_param("routing_layers", ParamSpec::Int { min: 2, max: 15 })
            .with_param("threads", ParamSpec::Int { min: 1, max: 64 }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params(json: &str) -> Parameters {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_validate_accepts_known_parameters() {
        let registry = ToolRegistry::with_builtin_tools();
        let spec = registry
            .validate("verilator", &params(r#"{"optimization_level": 2, "language_extensions": "sv"}"#))
            .await
            .unwrap();
        assert_eq!(spec.name, "verilator");
    }

    #[tokio::test]
    async fn test_validate_rejects_unknown_tool_and_parameters() {
        let registry = ToolRegistry::with_builtin_tools();

        let err = registry.validate("magic", &Parameters::new()).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));

        let err = registry.validate("", &Parameters::new()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidParameters { .. }));

        let err = registry.validate("verilator", &params(r#"{"bogus": 1}"#)).await.unwrap_err();
        assert!(err.to_string().contains("unknown parameter 'bogus'"));
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_types_and_ranges() {
        let registry = ToolRegistry::with_builtin_tools();

        let err = registry.validate("verilator", &params(r#"{"optimization_level": 9}"#)).await.unwrap_err();
        assert!(err.to_string().contains("outside"));

        let err = registry.validate("verilator", &params(r#"{"optimization_level": "high"}"#)).await.unwrap_err();
        assert!(err.to_string().contains("expected int"));

        let err = registry.validate("verilator", &params(r#"{"language_extensions": "vhdl"}"#)).await.unwrap_err();
        assert!(err.to_string().contains("not one of"));

        // Integral floats are accepted for integer options
        assert!(registry.validate("verilator", &params(r#"{"optimization_level": 2.0}"#)).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ToolRegistry::new();
        assert!(registry.register(ToolSpec::new("custom", "Custom flow")).await);
        assert!(!registry.register(ToolSpec::new("custom", "Custom flow v2")).await);

        let tools = registry.list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "Custom flow v2");
    }

    #[test]
    fn test_perturb_stays_in_range() {
        let spec = ParamSpec::Int { min: 0, max: 3 };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let next = spec.perturb(&ParamValue::Int(3), 1.0, &mut rng);
            assert!(spec.check(&next).is_ok());
        }

        let spec = ParamSpec::Float { min: 0.1, max: 0.9 };
        for _ in 0..200 {
            let next = spec.perturb(&ParamValue::Float(0.5), 0.5, &mut rng);
            assert!(spec.check(&next).is_ok());
        }
    }

    #[test]
    fn test_normalize_and_clamp() {
        let spec = ParamSpec::Int { min: 0, max: 4 };
        assert!((spec.normalize(&ParamValue::Int(2)) - 0.5).abs() < f64::EPSILON);
        assert_eq!(spec.clamp(&ParamValue::Float(7.6)), Some(ParamValue::Int(4)));
        assert_eq!(spec.clamp(&ParamValue::Text("x".to_string())), None);

        let choice = ParamSpec::choice(&["a", "b", "c"]);
        assert!((choice.normalize(&ParamValue::Text("c".to_string())) - 1.0).abs() < f64::EPSILON);
        assert_eq!(choice.clamp(&ParamValue::Text("z".to_string())), None);
    }
}
