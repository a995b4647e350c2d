//! Core data types for result caching.

use chrono::{DateTime, Utc};
use edaforge_abstraction::{ParamValue, Parameters, ToolInputs, ToolOutput};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::time::Instant;

/// Cache key for identifying a tool invocation.
///
/// The digest is a SHA-256 over the tool name, the canonical parameter
/// serialization and the input fingerprint. Equality and hashing use every
/// field, all of which are derived deterministically from the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    /// The tool name.
    pub tool_name: String,
    /// SHA-256 of the canonical parameter serialization.
    pub parameter_fingerprint: String,
    /// Fingerprint of the input artifacts.
    pub input_fingerprint: String,
    /// Combined digest.
    pub digest: String,
}

impl CacheKey {
    /// Create a cache key for a tool invocation.
    ///
    /// # Arguments
    /// * `tool_name` - The tool name
    /// * `parameters` - Tool parameters (canonicalized before hashing)
    /// * `input_fingerprint` - Fingerprint of the input artifacts
    pub fn new(tool_name: &str, parameters: &Parameters, input_fingerprint: &str) -> Self {
        use sha2::{Digest, Sha256};

        let canonical = canonical_parameters(parameters);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let parameter_fingerprint = format!("{:x}", hasher.finalize());

        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        hasher.update([0u8]);
        hasher.update(input_fingerprint.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Self {
            tool_name: tool_name.to_string(),
            parameter_fingerprint,
            input_fingerprint: input_fingerprint.to_string(),
            digest,
        }
    }

    /// Convenience constructor taking the inputs directly.
    pub fn for_inputs(tool_name: &str, parameters: &Parameters, inputs: &ToolInputs) -> Self {
        Self::new(tool_name, parameters, &inputs.fingerprint())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tool_name, &self.digest[..12])
    }
}

/// Serializes parameters into their canonical JSON form.
///
/// Keys are sorted, integral floats collapse to integers and negative zero
/// becomes zero, so `{"a": 2.0, "b": 1}` and `{"b": 1, "a": 2}` produce the
/// same string.
#[must_use]
pub fn canonical_parameters(parameters: &Parameters) -> String {
    let mut map = Map::new();
    for (name, value) in parameters {
        map.insert(name.clone(), canonical_value(value));
    }
    Value::Object(map).to_string()
}

fn canonical_value(value: &ParamValue) -> Value {
    match value {
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Int(i) => Value::Number(Number::from(*i)),
        ParamValue::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                Value::Number(Number::from(*f as i64))
            } else {
                // Non-finite floats have no JSON number form.
                Number::from_f64(*f).map_or_else(|| Value::String(f.to_string()), Value::Number)
            }
        }
        ParamValue::Text(s) => Value::String(s.clone()),
    }
}

/// A cached tool result with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The key this entry is stored under.
    pub key: CacheKey,
    /// The cached result.
    pub result: ToolOutput,
    /// Wall-clock time the entry was stored.
    pub stored_at: DateTime<Utc>,
    /// Monotonic insertion time (TTL checks).
    pub inserted: Instant,
    /// Timestamp of last access (LRU eviction).
    pub last_accessed: Instant,
    /// Number of cache hits served by this entry.
    pub hits: u64,
}

impl CacheEntry {
    /// Create a new cache entry stamped with the current time.
    pub fn new(key: CacheKey, result: ToolOutput) -> Self {
        let now = Instant::now();
        Self { key, result, stored_at: Utc::now(), inserted: now, last_accessed: now, hits: 0 }
    }

    /// Update the last accessed timestamp and increment the hit count.
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.hits += 1;
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was created.
    Inserted,
    /// An identical result was already stored; nothing changed.
    Unchanged,
    /// A different result replaced the stored one.
    Overwritten,
    /// The cache is disabled; nothing was stored.
    Skipped,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses.
    pub total_misses: u64,
    /// Total number of evictions (capacity or TTL).
    pub total_evictions: u64,
    /// Total number of rejected conflicting writes.
    pub total_conflicts: u64,
    /// Current number of entries.
    pub cache_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> Parameters {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a: Parameters = serde_json::from_str(r#"{"optimization_level": 2, "language_extensions": "sv"}"#).unwrap();
        let b: Parameters = serde_json::from_str(r#"{"language_extensions": "sv", "optimization_level": 2}"#).unwrap();

        assert_eq!(CacheKey::new("verilator", &a, "in"), CacheKey::new("verilator", &b, "in"));
    }

    #[test]
    fn test_cache_key_normalizes_numbers() {
        let int = params(&[("optimization_level", ParamValue::Int(2))]);
        let float = params(&[("optimization_level", ParamValue::Float(2.0))]);
        let zero = params(&[("slack", ParamValue::Float(-0.0))]);
        let int_zero = params(&[("slack", ParamValue::Int(0))]);

        assert_eq!(CacheKey::new("yosys", &int, "x").digest, CacheKey::new("yosys", &float, "x").digest);
        assert_eq!(CacheKey::new("yosys", &zero, "x").digest, CacheKey::new("yosys", &int_zero, "x").digest);
    }

    #[test]
    fn test_cache_key_distinguishes_tool_params_and_inputs() {
        let p = params(&[("optimization_level", ParamValue::Int(2))]);
        let q = params(&[("optimization_level", ParamValue::Int(3))]);
        let base = CacheKey::new("verilator", &p, "in");

        assert_ne!(base, CacheKey::new("yosys", &p, "in"));
        assert_ne!(base, CacheKey::new("verilator", &q, "in"));
        assert_ne!(base, CacheKey::new("verilator", &p, "other"));
    }

    #[test]
    fn test_canonical_parameters_sorted() {
        let p = params(&[("b", ParamValue::Float(1.5)), ("a", ParamValue::Bool(true))]);
        assert_eq!(canonical_parameters(&p), r#"{"a":true,"b":1.5}"#);
    }

    #[test]
    fn test_cache_entry_touch() {
        let key = CacheKey::new("verilator", &Parameters::new(), "in");
        let mut entry = CacheEntry::new(key, ToolOutput::default());
        let initial = entry.last_accessed;

        std::thread::sleep(std::time::Duration::from_millis(5));
        entry.touch();

        assert_eq!(entry.hits, 1);
        assert!(entry.last_accessed > initial);
    }
}
