//! Orchestration of EDA tool runs.
//!
//! The crate provides the task queue and worker pool, the topic-based
//! notifier, the parameter optimizer and the [`EdaService`] facade that wires
//! them together around a result cache and a session store.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod notifier;
pub mod optimizer;
pub mod queue;
pub mod registry;
pub mod service;
pub mod store;

pub use command::CommandTool;
pub use config::{
    ConfigError, NotifierConfig, OptimizerConfig, OrchestratorConfig, QueueConfig, StoreConfig, ToolCommandConfig,
    load_config,
};
pub use error::{ErrorKind, OrchestrationError, Result};
pub use events::{Event, EventType};
pub use executor::{QueueStats, TaskQueue};
pub use lifecycle::{Job, JobRequest, JobStatus, Priority};
pub use notifier::{ChannelSubscriber, DeliveryError, Notifier, Subscriber, Subscription};
pub use optimizer::{
    OptimizationRequest, OptimizationSession, Optimizer, ParameterTemplate, ProjectContext, Recommendation,
    SessionStatus, Strategy, StrategyInfo, Trial,
};
pub use registry::{ParamSpec, ToolRegistry, ToolSpec};
pub use service::{EdaService, HealthReport};
pub use store::{JsonFileStore, MemoryStore, SessionStore, StoreError};
