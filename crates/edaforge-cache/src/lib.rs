//! Result caching for EDA tool invocations.
//!
//! Identical invocations (same tool, canonically equal parameters, same input
//! artifacts) map to the same key, so a result observed once can be served
//! again without re-running the tool.

pub mod cache;
pub mod config;
pub mod types;

pub use cache::{CacheBackend, CacheError, ResultCache};
pub use config::{CacheConfig, CacheConfigError, WritePolicy};
pub use types::{CacheEntry, CacheKey, CacheStats, PutOutcome, canonical_parameters};
