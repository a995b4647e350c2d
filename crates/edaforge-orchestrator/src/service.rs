//! Service facade wiring the cache, task queue, notifier and optimizer.

use crate::command::CommandTool;
use crate::config::{ConfigError, OrchestratorConfig};
use crate::error::Result;
use crate::executor::{QueueStats, TaskQueue};
use crate::lifecycle::{Job, JobRequest};
use crate::notifier::{Notifier, Subscription};
use crate::optimizer::{
    OptimizationRequest, OptimizationSession, Optimizer, ParameterTemplate, ProjectContext, Recommendation,
    StrategyInfo,
};
use crate::registry::ToolRegistry;
use crate::store::{JsonFileStore, SessionStore};
use edaforge_abstraction::{EdaTool, Parameters};
use edaforge_cache::{CacheBackend, CacheStats, ResultCache};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Liveness snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Whether the worker pool has been started and is dispatching jobs.
    pub ready: bool,
    /// Optimization sessions still running.
    pub sessions_in_flight: usize,
    /// Jobs waiting for a worker.
    pub jobs_queued: usize,
    /// Jobs currently executing.
    pub jobs_running: usize,
    /// Live cache entries.
    pub cache_entries: usize,
}

/// The orchestration service.
#[derive(Debug)]
pub struct EdaService {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    notifier: Arc<Notifier>,
    queue: Arc<TaskQueue>,
    optimizer: Optimizer,
    shutdown: CancellationToken,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl EdaService {
    /// Builds a service around the given tool runner and store.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: OrchestratorConfig, tool: Arc<dyn EdaTool>, store: Arc<dyn SessionStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ToolRegistry::with_builtin_tools());
        let cache = Arc::new(ResultCache::new(config.cache.clone()).map_err(ConfigError::from)?);
        let notifier = Arc::new(Notifier::new(config.notifier.channel_capacity));
        let backend: Arc<dyn CacheBackend> = cache.clone();
        let queue = Arc::new(TaskQueue::new(
            config.queue.clone(),
            Arc::clone(&registry),
            tool,
            backend,
            Arc::clone(&notifier),
        ));
        let optimizer = Optimizer::new(
            config.optimizer.clone(),
            Arc::clone(&registry),
            Arc::clone(&queue),
            store,
            Arc::clone(&notifier),
        );

        Ok(Self {
            registry,
            cache,
            notifier,
            queue,
            optimizer,
            shutdown: CancellationToken::new(),
            cleanup: Mutex::new(None),
        })
    }

    /// Builds a service that runs the configured tool commands and persists to the configured store directory.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let tool = Arc::new(CommandTool::new(config.tools.clone()));
        let store = Arc::new(JsonFileStore::new(config.store.path.clone()));
        Self::new(config, tool, store)
    }

    /// Starts the worker pool and the cache expiry sweep.
    pub fn start(&self) {
        if self.queue.start() {
            let handle = self.cache.spawn_cleanup(self.shutdown.child_token());
            *self.cleanup.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            info!("EDA service started");
        }
    }

    /// Stops sessions, the worker pool and background tasks.
    pub async fn shutdown(&self) {
        self.optimizer.shutdown().await;
        self.queue.shutdown().await;
        self.shutdown.cancel();
        let cleanup = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = cleanup {
            let _ = handle.await;
        }
        info!("EDA service stopped");
    }

    /// Liveness snapshot.
    pub async fn health(&self) -> HealthReport {
        let stats = self.queue.stats();
        HealthReport {
            ready: self.queue.is_running(),
            sessions_in_flight: self.optimizer.active_sessions().await,
            jobs_queued: stats.queued,
            jobs_running: stats.running,
            cache_entries: self.cache.len(),
        }
    }

    /// Tool registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Event hub.
    #[must_use]
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Optimizer.
    #[must_use]
    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    /// Submits a job with normal priority.
    pub async fn add_task(&self, tool_name: &str, parameters: Parameters, project_id: &str) -> Result<String> {
        self.queue.add_task(tool_name, parameters, project_id).await
    }

    /// Submits a job.
    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        self.queue.submit(request).await
    }

    /// Job snapshot.
    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.queue.get_status(job_id)
    }

    /// Waits for a job to finish.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Job> {
        self.queue.wait_for_completion(job_id).await
    }

    /// Cancels a job.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.queue.cancel(job_id)
    }

    /// Queue counters.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats()
    }

    /// Starts an optimization session.
    pub async fn start_optimization(&self, request: OptimizationRequest) -> Result<String> {
        self.optimizer.start_optimization(request).await
    }

    /// Session snapshot.
    pub async fn get_status(&self, session_id: &str) -> Result<OptimizationSession> {
        self.optimizer.get_status(session_id).await
    }

    /// Waits for a session to finish.
    pub async fn wait_for_session(&self, session_id: &str) -> Result<OptimizationSession> {
        self.optimizer.wait_for_session(session_id).await
    }

    /// Cancels a session.
    pub async fn cancel_optimization(&self, session_id: &str) -> bool {
        self.optimizer.cancel_optimization(session_id).await
    }

    /// Past sessions of a project.
    pub async fn get_history(&self, project_id: &str) -> Result<Vec<OptimizationSession>> {
        self.optimizer.get_history(project_id).await
    }

    /// Stores a parameter template.
    pub async fn save_template(
        &self,
        tool_name: &str,
        template_name: &str,
        parameters: Parameters,
        project_context: ProjectContext,
        overwrite: bool,
    ) -> Result<ParameterTemplate> {
        self.optimizer.save_template(tool_name, template_name, parameters, project_context, overwrite).await
    }

    /// Ranked templates for a context.
    pub async fn get_recommendations(
        &self,
        tool_name: &str,
        project_context: &ProjectContext,
        limit: usize,
    ) -> Result<Vec<Recommendation>> {
        self.optimizer.get_recommendations(tool_name, project_context, limit).await
    }

    /// Supported strategies.
    #[must_use]
    pub fn list_strategies(&self) -> Vec<StrategyInfo> {
        self.optimizer.list_strategies()
    }

    /// Opens an event stream for a topic (project, job or session id).
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.notifier.subscribe_channel(topic)
    }

    /// Drops one topic registration.
    pub fn unsubscribe(&self, connection_id: &str, topic: &str) -> bool {
        self.notifier.unsubscribe(connection_id, topic)
    }

    /// Drops every registration of a connection.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        self.notifier.disconnect(connection_id)
    }
}
