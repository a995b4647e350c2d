//! Event envelopes delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A job was accepted.
    JobQueued,
    /// A worker started a job.
    JobStarted,
    /// A job was served from the cache.
    CacheHit,
    /// A job finished successfully.
    JobCompleted,
    /// A job failed.
    JobFailed,
    /// An optimization session recorded a trial.
    Progress,
    /// An optimization session reached a terminal status.
    OptimizationCompleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::JobQueued => "job_queued",
            Self::JobStarted => "job_started",
            Self::CacheHit => "cache_hit",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::Progress => "progress",
            Self::OptimizationCompleted => "optimization_completed",
        };
        f.write_str(name)
    }
}

/// Envelope for a single notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    pub event_type: EventType,
    /// Topic the event was published on.
    pub topic: String,
    /// Type-specific payload.
    pub payload: Value,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: EventType, topic: impl Into<String>, payload: Value) -> Self {
        Self { event_type, topic: topic.into(), payload, timestamp: Utc::now() }
    }

    /// Returns a copy addressed to another topic.
    #[must_use]
    pub fn retarget(&self, topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), ..self.clone() }
    }
}
