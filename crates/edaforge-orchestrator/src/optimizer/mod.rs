//! AI parameter optimizer.
//!
//! Each session runs in its own task: propose parameters, submit them to the
//! task queue, wait for the jobs, score the metrics, update the surrogate and
//! decide whether to stop. Finished sessions are persisted for transfer
//! learning and reported through the notifier. Once persisted they are served
//! from the store rather than kept in memory.

pub mod proposer;
pub mod scoring;
pub mod session;
pub mod surrogate;
pub mod templates;
pub mod transfer;

pub use proposer::{ParameterProposer, SurrogateSearch};
pub use scoring::{metric_distance, score};
pub use session::{
    OptimizationRequest, OptimizationSession, ProjectContext, SessionStatus, Strategy, StrategyInfo, Trial,
    list_strategies,
};
pub use templates::{ParameterTemplate, Recommendation, rank_templates};

use crate::config::OptimizerConfig;
use crate::error::{ErrorKind, OrchestrationError, Result};
use crate::events::{Event, EventType};
use crate::executor::TaskQueue;
use crate::lifecycle::{JobRequest, JobStatus, Priority};
use crate::notifier::Notifier;
use crate::registry::ToolRegistry;
use crate::store::{SessionStore, StoreError};
use edaforge_abstraction::{Metrics, Parameters};
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct SessionHandle {
    session: OptimizationSession,
    cancel: CancellationToken,
    /// Set once the terminal session has been persisted and announced.
    completed: bool,
}

struct OptimizerInner {
    config: OptimizerConfig,
    registry: Arc<ToolRegistry>,
    queue: Arc<TaskQueue>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<Notifier>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    shutdown: CancellationToken,
    runners: Mutex<Vec<JoinHandle<()>>>,
    session_counter: AtomicU64,
}

/// Parameter optimizer service.
#[derive(Clone)]
pub struct Optimizer {
    inner: Arc<OptimizerInner>,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

/// Evaluation of one proposed parameter set.
struct Candidate {
    params: Parameters,
    job_id: Option<String>,
    metrics: Metrics,
    score: f64,
    error: Option<String>,
}

impl Optimizer {
    /// Creates an optimizer that runs trials through `queue`.
    #[must_use]
    pub fn new(
        config: OptimizerConfig,
        registry: Arc<ToolRegistry>,
        queue: Arc<TaskQueue>,
        store: Arc<dyn SessionStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(OptimizerInner {
                config,
                registry,
                queue,
                store,
                notifier,
                sessions: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                runners: Mutex::new(Vec::new()),
                session_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Starts an optimization session in the background.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for an unknown tool, invalid initial
    /// parameters, empty or non-finite targets, or a zero iteration budget.
    pub async fn start_optimization(&self, request: OptimizationRequest) -> Result<String> {
        let inner = &self.inner;
        if request.project_id.trim().is_empty() {
            return Err(OrchestrationError::invalid(&request.tool_name, "project_id must not be empty"));
        }
        if request.target_metrics.is_empty() {
            return Err(OrchestrationError::invalid(&request.tool_name, "target_metrics must not be empty"));
        }
        if let Some((name, _)) = request.target_metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(OrchestrationError::invalid(&request.tool_name, format!("target '{name}' must be finite")));
        }
        let max_iterations = request.max_iterations.unwrap_or(inner.config.default_max_iterations);
        if max_iterations == 0 {
            return Err(OrchestrationError::invalid(&request.tool_name, "max_iterations must be at least 1"));
        }
        let spec = inner.registry.validate(&request.tool_name, &request.initial_params).await?;

        let strategy = Strategy::parse_or_default(&request.strategy);
        let session_id = format!("opt-{}", uuid::Uuid::new_v4());
        let mut session = OptimizationSession::new(session_id.clone(), request, strategy, max_iterations);

        let mut transfer_seed = session.initial_params.clone();
        if matches!(strategy, Strategy::TransferLearning | Strategy::Ensemble) {
            match inner.store.sessions_for_tool(&session.tool_name).await {
                Ok(history) => {
                    if let Some((donor, similarity)) =
                        transfer::most_similar(&history, &session.project_id, &session.project_context)
                    {
                        info!(
                            session_id = %session_id,
                            donor_session = %donor.session_id,
                            donor_project = %donor.project_id,
                            similarity,
                            "Seeding from similar project"
                        );
                        transfer_seed = transfer::seed_parameters(&spec, &session.initial_params, &donor.best_params);
                    } else {
                        debug!(session_id = %session_id, "No prior sessions to transfer from");
                    }
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "Session history unavailable, no transfer seed"),
            }
        }
        if strategy == Strategy::TransferLearning {
            session.seed_params = transfer_seed.clone();
            session.best_params = transfer_seed.clone();
        }

        let rng = match inner.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(inner.session_counter.fetch_add(1, Ordering::SeqCst))),
            None => StdRng::from_entropy(),
        };
        let search = SurrogateSearch::new(spec, &inner.config, max_iterations, rng);
        let proposer = ParameterProposer::new(strategy, search, transfer_seed, inner.config.ensemble_width);

        let cancel = inner.shutdown.child_token();
        inner
            .sessions
            .write()
            .await
            .insert(session_id.clone(), SessionHandle { session, cancel: cancel.clone(), completed: false });

        info!(session_id = %session_id, %strategy, max_iterations, "Optimization session started");
        let runner = Arc::clone(inner);
        let id = session_id.clone();
        let handle = tokio::spawn(async move {
            runner.run_session(&id, proposer, cancel).await;
        });
        let mut runners = inner.runners.lock().unwrap_or_else(PoisonError::into_inner);
        runners.retain(|h| !h.is_finished());
        runners.push(handle);

        Ok(session_id)
    }

    /// Returns a snapshot of a session.
    ///
    /// # Errors
    /// Returns `NotFound` if the session is unknown to both memory and the store.
    pub async fn get_status(&self, session_id: &str) -> Result<OptimizationSession> {
        if let Some(handle) = self.inner.sessions.read().await.get(session_id) {
            return Ok(handle.session.clone());
        }
        self.inner
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound { kind: "session", id: session_id.to_string() })
    }

    /// Finished sessions of a project, oldest first.
    ///
    /// # Errors
    /// Returns `Store` if the history cannot be read.
    pub async fn get_history(&self, project_id: &str) -> Result<Vec<OptimizationSession>> {
        Ok(self.inner.store.sessions_for_project(project_id).await?)
    }

    /// Stops a running session. Jobs already submitted keep running.
    ///
    /// # Returns
    /// Returns `true` if the session was running.
    pub async fn cancel_optimization(&self, session_id: &str) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(handle) = sessions.get_mut(session_id) else {
            return false;
        };
        if handle.session.status.is_terminal() {
            return false;
        }
        handle.session.finish(SessionStatus::Cancelled, "cancelled by request", Some(ErrorKind::Cancelled));
        handle.cancel.cancel();
        info!(session_id = %session_id, "Optimization session cancelled");
        true
    }

    /// Stores a named parameter template.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for an empty name, unknown tool or invalid
    /// parameters, and `DuplicateTemplate` if the name is taken and `overwrite` is false.
    pub async fn save_template(
        &self,
        tool_name: &str,
        template_name: &str,
        parameters: Parameters,
        project_context: ProjectContext,
        overwrite: bool,
    ) -> Result<ParameterTemplate> {
        if template_name.trim().is_empty() {
            return Err(OrchestrationError::invalid(tool_name, "template name must not be empty"));
        }
        self.inner.registry.validate(tool_name, &parameters).await?;

        let template = ParameterTemplate::new(tool_name, template_name, parameters, project_context);
        match self.inner.store.put_template(&template, overwrite).await {
            Ok(replaced) => {
                info!(tool = %tool_name, template = %template_name, replaced, "Template saved");
                Ok(template)
            }
            Err(StoreError::Duplicate { tool, name }) => Err(OrchestrationError::DuplicateTemplate { tool, name }),
            Err(e) => Err(e.into()),
        }
    }

    /// Templates for a tool ranked by similarity to `project_context`.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for an unknown tool and `Store` if templates cannot be read.
    pub async fn get_recommendations(
        &self,
        tool_name: &str,
        project_context: &ProjectContext,
        limit: usize,
    ) -> Result<Vec<Recommendation>> {
        self.inner.registry.validate(tool_name, &Parameters::new()).await?;
        let templates = self.inner.store.templates_for_tool(tool_name).await?;
        Ok(rank_templates(templates, project_context, limit))
    }

    /// The supported strategies.
    #[must_use]
    pub fn list_strategies(&self) -> Vec<StrategyInfo> {
        list_strategies()
    }

    /// Number of sessions still running.
    pub async fn active_sessions(&self) -> usize {
        self.inner.sessions.read().await.values().filter(|h| !h.session.status.is_terminal()).count()
    }

    /// Waits until a session has finished and been persisted.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions.
    pub async fn wait_for_session(&self, session_id: &str) -> Result<OptimizationSession> {
        let mut events = self.inner.notifier.subscribe_channel(session_id);
        let result = loop {
            let done = self.inner.sessions.read().await.get(session_id).map(|h| h.completed);
            match done {
                Some(false) => {}
                // Finished sessions that are only in the store are already complete
                Some(true) | None => break self.get_status(session_id).await,
            }
            tokio::select! {
                _ = events.recv() => {}
                () = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            }
        };
        self.inner.notifier.disconnect(&events.connection_id);
        result
    }

    /// Cancels every running session and waits for the runners to stop.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let runners: Vec<_> = self.inner.runners.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for runner in runners {
            if let Err(e) = runner.await {
                error!(error = %e, "Session runner ended abnormally");
            }
        }
    }
}

impl OptimizerInner {
    async fn snapshot(&self, session_id: &str) -> Option<OptimizationSession> {
        self.sessions.read().await.get(session_id).map(|h| h.session.clone())
    }

    async fn run_session(&self, session_id: &str, mut proposer: ParameterProposer, cancel: CancellationToken) {
        let mut consecutive_failures = 0u32;
        let mut since_improvement = 0u32;

        loop {
            let Some(session) = self.snapshot(session_id).await else {
                error!(session_id = %session_id, "Session vanished");
                return;
            };
            if session.status.is_terminal() {
                break;
            }
            if cancel.is_cancelled() {
                self.finish(session_id, SessionStatus::Cancelled, "optimizer shutting down", Some(ErrorKind::Cancelled))
                    .await;
                break;
            }

            let round = proposer.next_round(&session);
            let evaluated = tokio::select! {
                evaluated = self.evaluate_round(&session, round) => evaluated,
                () = cancel.cancelled() => continue,
            };
            for candidate in &evaluated {
                proposer.observe(&candidate.params, candidate.score);
            }

            let candidates_evaluated = evaluated.len();
            let job_ids: Vec<String> = evaluated.iter().filter_map(|c| c.job_id.clone()).collect();
            let Some(best) = evaluated.into_iter().max_by(|a, b| {
                a.error.is_none().cmp(&b.error.is_none()).then_with(|| a.score.total_cmp(&b.score))
            }) else {
                continue;
            };
            let trial = Trial {
                iteration: 0,
                params: best.params,
                metrics: best.metrics,
                score: best.score,
                job_ids,
                error: best.error,
                candidates_evaluated,
            };

            let (snapshot, stop) = {
                let mut sessions = self.sessions.write().await;
                let Some(handle) = sessions.get_mut(session_id) else {
                    return;
                };
                let session = &mut handle.session;
                if session.status.is_terminal() {
                    break;
                }

                let succeeded = trial.succeeded();
                let last_error = trial.error.clone();
                let improved = session.record_trial(trial);
                if succeeded {
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                }
                if improved {
                    since_improvement = 0;
                } else {
                    since_improvement += 1;
                }

                let stop = self.stop_condition(session, succeeded, consecutive_failures, since_improvement, last_error);
                if let Some((status, reason, kind)) = &stop {
                    session.finish(*status, reason.clone(), *kind);
                }
                (session.clone(), stop.is_some())
            };

            self.publish_progress(&snapshot);
            if stop {
                break;
            }
        }

        self.complete(session_id).await;
    }

    fn stop_condition(
        &self,
        session: &OptimizationSession,
        succeeded: bool,
        consecutive_failures: u32,
        since_improvement: u32,
        last_error: Option<String>,
    ) -> Option<(SessionStatus, String, Option<ErrorKind>)> {
        let latest = session.trial_history.last().map_or(0.0, |t| t.score);
        if succeeded && latest >= self.config.score_threshold {
            return Some((
                SessionStatus::Converged,
                format!("score {latest:.4} reached threshold {:.4}", self.config.score_threshold),
                None,
            ));
        }
        if consecutive_failures > self.config.failure_tolerance {
            let reason = format!(
                "{consecutive_failures} consecutive failed trials: {}",
                last_error.unwrap_or_else(|| "unknown error".to_string())
            );
            return Some((SessionStatus::Failed, reason, Some(ErrorKind::ToolExecutionError)));
        }
        if session.iteration_count >= session.max_iterations {
            if session.best_iteration.is_none() {
                let reason = format!("no successful trial in {} iterations", session.iteration_count);
                return Some((SessionStatus::Failed, reason, Some(ErrorKind::ToolExecutionError)));
            }
            return Some((
                SessionStatus::Exhausted,
                format!("reached max_iterations {}", session.max_iterations),
                None,
            ));
        }
        if session.best_iteration.is_some() && since_improvement >= self.config.patience {
            return Some((
                SessionStatus::Converged,
                format!("no improvement for {since_improvement} iterations"),
                None,
            ));
        }
        None
    }

    /// Submits every proposal and waits for all of them (barrier).
    async fn evaluate_round(&self, session: &OptimizationSession, round: Vec<Parameters>) -> Vec<Candidate> {
        let evaluations = round.into_iter().map(|params| self.evaluate(session, params));
        join_all(evaluations).await
    }

    async fn evaluate(&self, session: &OptimizationSession, params: Parameters) -> Candidate {
        let request = JobRequest::new(&session.tool_name, params.clone(), &session.project_id)
            .with_priority(Priority::Batch);
        let job_id = match self.queue.submit(request).await {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "Trial submission rejected");
                return Candidate { params, job_id: None, metrics: Metrics::new(), score: 0.0, error: Some(e.to_string()) };
            }
        };

        match self.queue.wait_for_completion(&job_id).await {
            Ok(job) if job.status == JobStatus::Succeeded => {
                let metrics = job.result.map(|r| r.metrics).unwrap_or_default();
                let score = score(&metrics, &session.target_metrics);
                debug!(session_id = %session.session_id, job_id = %job_id, score, cache_hit = job.cache_hit, "Trial scored");
                Candidate { params, job_id: Some(job_id), metrics, score, error: None }
            }
            Ok(job) => {
                let reason = job.reason.unwrap_or_else(|| "job failed".to_string());
                Candidate { params, job_id: Some(job_id), metrics: Metrics::new(), score: 0.0, error: Some(reason) }
            }
            Err(e) => Candidate { params, job_id: Some(job_id), metrics: Metrics::new(), score: 0.0, error: Some(e.to_string()) },
        }
    }

    async fn finish(&self, session_id: &str, status: SessionStatus, reason: &str, kind: Option<ErrorKind>) {
        if let Some(handle) = self.sessions.write().await.get_mut(session_id) {
            handle.session.finish(status, reason, kind);
        }
    }

    fn publish(&self, session: &OptimizationSession, event_type: EventType, payload: serde_json::Value) {
        let event = Event::new(event_type, session.project_id.clone(), payload);
        self.notifier.publish(&session.project_id, &event);
        self.notifier.publish(&session.session_id, &event.retarget(session.session_id.clone()));
    }

    fn publish_progress(&self, session: &OptimizationSession) {
        let Some(trial) = session.trial_history.last() else {
            return;
        };
        self.publish(
            session,
            EventType::Progress,
            json!({
                "session_id": session.session_id,
                "project_id": session.project_id,
                "iteration": session.iteration_count,
                "max_iterations": session.max_iterations,
                "trial": trial,
                "best_score": session.best_score,
                "best_params": session.best_params,
                "status": session.status,
            }),
        );
    }

    /// Persists the terminal session, releases it from memory and announces it.
    ///
    /// A session that could not be persisted stays in memory so its status remains queryable.
    async fn complete(&self, session_id: &str) {
        let Some(session) = self.snapshot(session_id).await else {
            return;
        };
        let persisted = match self.store.save_session(&session).await {
            Ok(()) => true,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to persist session, keeping it in memory");
                false
            }
        };
        {
            let mut sessions = self.sessions.write().await;
            if persisted {
                sessions.remove(session_id);
            } else if let Some(handle) = sessions.get_mut(session_id) {
                handle.completed = true;
            }
        }
        info!(
            session_id = %session_id,
            status = %session.status,
            iterations = session.iteration_count,
            best_score = session.best_score,
            "Optimization session finished"
        );
        self.publish(
            &session,
            EventType::OptimizationCompleted,
            json!({
                "session_id": session.session_id,
                "project_id": session.project_id,
                "status": session.status,
                "reason": session.reason,
                "error_kind": session.error_kind,
                "iterations": session.iteration_count,
                "best_score": session.best_score,
                "best_params": session.best_params,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use edaforge_abstraction::SimulatedTool;
    use edaforge_cache::{CacheConfig, ResultCache};
    use std::path::PathBuf;

    /// Store that refuses to save sessions.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn save_session(&self, _session: &OptimizationSession) -> StoreResult<()> {
            Err(StoreError::Io {
                path: PathBuf::from("sessions"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        async fn get_session(&self, session_id: &str) -> StoreResult<Option<OptimizationSession>> {
            self.inner.get_session(session_id).await
        }

        async fn sessions_for_project(&self, project_id: &str) -> StoreResult<Vec<OptimizationSession>> {
            self.inner.sessions_for_project(project_id).await
        }

        async fn sessions_for_tool(&self, tool_name: &str) -> StoreResult<Vec<OptimizationSession>> {
            self.inner.sessions_for_tool(tool_name).await
        }

        async fn put_template(&self, template: &ParameterTemplate, overwrite: bool) -> StoreResult<bool> {
            self.inner.put_template(template, overwrite).await
        }

        async fn get_template(&self, tool_name: &str, name: &str) -> StoreResult<Option<ParameterTemplate>> {
            self.inner.get_template(tool_name, name).await
        }

        async fn templates_for_tool(&self, tool_name: &str) -> StoreResult<Vec<ParameterTemplate>> {
            self.inner.templates_for_tool(tool_name).await
        }
    }

    fn optimizer(store: Arc<dyn SessionStore>) -> (Optimizer, Arc<TaskQueue>) {
        let registry = Arc::new(ToolRegistry::with_builtin_tools());
        let notifier = Arc::new(Notifier::new(64));
        let queue = Arc::new(TaskQueue::new(
            QueueConfig { poll_interval_ms: 10, ..QueueConfig::default() },
            Arc::clone(&registry),
            Arc::new(SimulatedTool::new()),
            Arc::new(ResultCache::new(CacheConfig::default()).unwrap()),
            Arc::clone(&notifier),
        ));
        queue.start();
        let config = OptimizerConfig { seed: Some(7), ..OptimizerConfig::default() };
        (Optimizer::new(config, registry, Arc::clone(&queue), store, notifier), queue)
    }

    fn request() -> OptimizationRequest {
        let mut targets = Metrics::new();
        targets.insert("execution_time".to_string(), 40.0);
        OptimizationRequest::new("verilator", "proj", targets).with_max_iterations(3)
    }

    #[tokio::test]
    async fn test_persisted_session_released_from_memory() {
        let store = Arc::new(MemoryStore::new());
        let (optimizer, queue) = optimizer(store.clone());

        let session_id = optimizer.start_optimization(request()).await.unwrap();
        let finished = optimizer.wait_for_session(&session_id).await.unwrap();

        assert!(finished.status.is_terminal());
        assert!(optimizer.inner.sessions.read().await.is_empty());
        assert_eq!(optimizer.get_status(&session_id).await.unwrap().status, finished.status);
        assert!(store.get_session(&session_id).await.unwrap().is_some());
        assert!(!optimizer.cancel_optimization(&session_id).await);
        optimizer.shutdown().await;
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unpersisted_session_stays_queryable() {
        let (optimizer, queue) = optimizer(Arc::new(ReadOnlyStore::default()));

        let session_id = optimizer.start_optimization(request()).await.unwrap();
        let finished = optimizer.wait_for_session(&session_id).await.unwrap();

        assert!(finished.status.is_terminal());
        assert!(optimizer.inner.sessions.read().await.contains_key(&session_id));
        assert_eq!(optimizer.get_status(&session_id).await.unwrap().status, finished.status);
        assert_eq!(optimizer.active_sessions().await, 0);
        optimizer.shutdown().await;
        queue.shutdown().await;
    }
}
