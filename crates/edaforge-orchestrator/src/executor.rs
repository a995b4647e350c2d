//! Task queue and worker pool.
//!
//! A single dispatcher task pulls jobs from the pending queue while a semaphore
//! bounds the number of concurrently running workers. Each worker consults the
//! result cache, coalesces with an in-flight execution of the same cache key,
//! or runs the tool itself. Finished jobs stay queryable until
//! `retained_jobs` newer ones have finished.

use crate::config::QueueConfig;
use crate::error::{ErrorKind, OrchestrationError, Result};
use crate::events::{Event, EventType};
use crate::lifecycle::{Job, JobRequest, JobStatus};
use crate::notifier::Notifier;
use crate::queue::PendingQueue;
use crate::registry::ToolRegistry;
use edaforge_abstraction::{EdaTool, Parameters, ToolError, ToolOutput};
use edaforge_cache::{CacheBackend, CacheError, CacheKey};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs currently executing.
    pub running: usize,
    /// Jobs that finished successfully.
    pub succeeded: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Tool invocations actually started (cache hits excluded).
    pub tool_runs: usize,
}

struct JobRecord {
    job: Job,
    /// Latest snapshot, kept by waiters after the record is evicted.
    updates: watch::Sender<Job>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, JobRecord>,
    pending: PendingQueue,
    /// Terminal job ids, oldest first.
    finished: VecDeque<String>,
}

/// Outcome shared from a leader execution to coalesced followers.
type FlightOutcome = Option<std::result::Result<ToolOutput, ToolError>>;

enum Flight {
    Lead(watch::Sender<FlightOutcome>, watch::Receiver<FlightOutcome>),
    Follow(watch::Receiver<FlightOutcome>),
}

enum Execution {
    CacheHit(ToolOutput),
    Ran(std::result::Result<ToolOutput, ToolError>),
    Cancelled,
}

struct QueueInner {
    config: QueueConfig,
    registry: Arc<ToolRegistry>,
    tool: Arc<dyn EdaTool>,
    cache: Arc<dyn CacheBackend>,
    notifier: Arc<Notifier>,
    state: Mutex<QueueState>,
    flights: Mutex<HashMap<CacheKey, watch::Receiver<FlightOutcome>>>,
    wakeup: Notify,
    semaphore: Arc<Semaphore>,
    running: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    tool_runs: AtomicUsize,
}

/// Bounded worker pool executing tool jobs.
pub struct TaskQueue {
    inner: Arc<QueueInner>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("workers", &self.inner.config.workers)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Creates a task queue. Call [`TaskQueue::start`] to begin processing.
    #[must_use]
    pub fn new(
        config: QueueConfig,
        registry: Arc<ToolRegistry>,
        tool: Arc<dyn EdaTool>,
        cache: Arc<dyn CacheBackend>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            inner: Arc::new(QueueInner {
                config,
                registry,
                tool,
                cache,
                notifier,
                state: Mutex::new(QueueState::default()),
                flights: Mutex::new(HashMap::new()),
                wakeup: Notify::new(),
                semaphore,
                running: AtomicUsize::new(0),
                succeeded: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                tool_runs: AtomicUsize::new(0),
            }),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Starts the dispatcher in a background task.
    ///
    /// # Returns
    /// Returns `false` if the dispatcher was already running or the queue was shut down.
    pub fn start(&self) -> bool {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if dispatcher.is_some() || self.shutdown.is_cancelled() {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        *dispatcher = Some(tokio::spawn(async move {
            info!(workers = inner.config.workers, "Task queue started");
            dispatch_loop(inner, shutdown).await;
            info!("Task queue stopped");
        }));
        true
    }

    /// Whether the dispatcher has been started and is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
            && self
                .dispatcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the dispatcher. Running workers finish their current job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatcher task ended abnormally");
            }
        }
    }

    /// Submits a job with normal priority and no input artifacts.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for unknown tools or malformed parameters.
    pub async fn add_task(&self, tool_name: &str, parameters: Parameters, project_id: &str) -> Result<String> {
        self.submit(JobRequest::new(tool_name, parameters, project_id)).await
    }

    /// Submits a job.
    ///
    /// # Errors
    /// Returns `InvalidParameters` for unknown tools or malformed parameters.
    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        self.inner.registry.validate(&request.tool_name, &request.parameters).await?;

        let job_id = format!("job-{}", uuid::Uuid::new_v4());
        let job = Job::new(job_id.clone(), request);
        let event = job_event(EventType::JobQueued, &job);
        let tool_name = job.tool_name.clone();
        {
            let mut state = self.inner.lock_state();
            let (updates, _) = watch::channel(job.clone());
            state.pending.push(job_id.clone(), job.priority);
            state.jobs.insert(job_id.clone(), JobRecord { job, updates, cancel: CancellationToken::new() });
            // Published under the state lock so job_queued always precedes job_started
            self.inner.publish(&event);
        }
        self.inner.wakeup.notify_one();

        info!(job_id = %job_id, tool = %tool_name, "Job queued");
        Ok(job_id)
    }

    /// Returns a snapshot of a job.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown, cancelled-while-queued or evicted jobs.
    pub fn get_status(&self, job_id: &str) -> Result<Job> {
        self.inner
            .lock_state()
            .jobs
            .get(job_id)
            .map(|record| record.job.clone())
            .ok_or_else(|| OrchestrationError::NotFound { kind: "job", id: job_id.to_string() })
    }

    /// Waits until the job reaches a terminal status and returns that snapshot.
    ///
    /// The snapshot is returned even if the job is evicted from the job table
    /// before the waiter wakes up.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown jobs and `Cancelled` if the job is removed while queued.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<Job> {
        let mut updates = {
            let state = self.inner.lock_state();
            let record = state
                .jobs
                .get(job_id)
                .ok_or_else(|| OrchestrationError::NotFound { kind: "job", id: job_id.to_string() })?;
            record.updates.subscribe()
        };

        let finished = updates.wait_for(|job| job.status.is_terminal()).await.map(|job| (*job).clone());
        finished.map_err(|_| OrchestrationError::Cancelled(job_id.to_string()))
    }

    /// Cancels a job.
    ///
    /// A queued job is removed from the queue and the job table. A running job
    /// is only interrupted when `terminate_running_on_cancel` is enabled.
    ///
    /// # Returns
    /// Returns `true` if the job was removed or interrupted.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut state = self.inner.lock_state();
        let Some(record) = state.jobs.get(job_id) else {
            debug!(job_id = %job_id, "Cancel requested for unknown job");
            return false;
        };

        match record.job.status {
            JobStatus::Queued => {
                state.pending.remove(job_id);
                state.jobs.remove(job_id);
                info!(job_id = %job_id, "Queued job cancelled");
                true
            }
            JobStatus::Running if self.inner.config.terminate_running_on_cancel => {
                record.cancel.cancel();
                info!(job_id = %job_id, "Running job termination requested");
                true
            }
            status => {
                debug!(job_id = %job_id, %status, "Job cannot be cancelled");
                false
            }
        }
    }

    /// Returns queue occupancy counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let queued = self.inner.lock_state().pending.len();
        QueueStats {
            queued,
            running: self.inner.running.load(Ordering::SeqCst),
            succeeded: self.inner.succeeded.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            tool_runs: self.inner.tool_runs.load(Ordering::SeqCst),
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_loop(inner: Arc<QueueInner>, shutdown: CancellationToken) {
    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&inner.semaphore).acquire_owned() => {
                let Ok(permit) = permit else {
                    error!("Semaphore closed, stopping dispatcher");
                    break;
                };
                permit
            }
        };

        let next = loop {
            if let Some(next) = inner.next_job() {
                break Some(next);
            }
            tokio::select! {
                () = shutdown.cancelled() => break None,
                () = inner.wakeup.notified() => {}
                () = time::sleep(inner.config.poll_interval()) => {}
            }
        };
        let Some((job, cancel)) = next else {
            break;
        };

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            worker.process_job(job, cancel, permit).await;
        });
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: &Event) {
        let job_id = event.payload["job_id"].as_str().unwrap_or_default().to_string();
        self.notifier.publish(&event.topic, event);
        if !job_id.is_empty() && job_id != event.topic {
            self.notifier.publish(&job_id, &event.retarget(job_id.clone()));
        }
    }

    /// Pops the next job and marks it running in one step so `cancel` cannot race the dispatch.
    fn next_job(&self) -> Option<(Job, CancellationToken)> {
        let mut state = self.lock_state();
        while let Some(job_id) = state.pending.pop() {
            let Some(record) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if let Err(status) = record.job.transition(JobStatus::Running) {
                warn!(job_id = %job_id, %status, "Dequeued job is not runnable");
                continue;
            }
            record.updates.send_replace(record.job.clone());
            self.running.fetch_add(1, Ordering::SeqCst);
            return Some((record.job.clone(), record.cancel.clone()));
        }
        None
    }

    async fn process_job(&self, job: Job, cancel: CancellationToken, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        debug!(job_id = %job.job_id, tool = %job.tool_name, "Processing job");
        self.publish(&job_event(EventType::JobStarted, &job));

        let key = CacheKey::for_inputs(&job.tool_name, &job.parameters, &job.inputs);
        let execution = tokio::select! {
            execution = self.execute(&job, &key) => execution,
            () = cancel.cancelled() => Execution::Cancelled,
        };

        self.finish(&job.job_id, execution);
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    /// Runs the job through the cache and single-flight coalescing.
    async fn execute(&self, job: &Job, key: &CacheKey) -> Execution {
        loop {
            match self.cache.get(key) {
                Ok(Some(result)) => return Execution::CacheHit(result),
                Ok(None) => {}
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Cache lookup failed, treating as miss"),
            }

            let flight = {
                let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(rx) = flights.get(key) {
                    Flight::Follow(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    flights.insert(key.clone(), rx.clone());
                    Flight::Lead(tx, rx)
                }
            };

            match flight {
                Flight::Lead(tx, rx) => {
                    let guard = FlightGuard { flights: &self.flights, key, rx };
                    // A leader that finished after our lookup has already cached its result
                    if let Ok(Some(result)) = self.cache.get(key) {
                        drop(guard);
                        tx.send_replace(Some(Ok(result.clone())));
                        return Execution::CacheHit(result);
                    }
                    return Execution::Ran(self.lead(job, key, tx, guard).await);
                }
                Flight::Follow(mut rx) => {
                    debug!(job_id = %job.job_id, key = %key, "Waiting for in-flight execution");
                    let outcome = rx.wait_for(Option::is_some).await.ok().and_then(|outcome| (*outcome).clone());
                    if let Some(Ok(result)) = outcome {
                        return Execution::CacheHit(result);
                    }
                    debug!(job_id = %job.job_id, key = %key, "Leader did not succeed, retrying");
                }
            }
        }
    }

    async fn lead(
        &self,
        job: &Job,
        key: &CacheKey,
        tx: watch::Sender<FlightOutcome>,
        guard: FlightGuard<'_>,
    ) -> std::result::Result<ToolOutput, ToolError> {
        self.tool_runs.fetch_add(1, Ordering::SeqCst);
        let run = self.tool.run(&job.tool_name, &job.parameters, &job.inputs);
        let result = match self.config.tool_timeout() {
            Some(limit) => match time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout { tool: job.tool_name.clone(), secs: limit.as_secs() }),
            },
            None => run.await,
        };

        if let Ok(output) = &result {
            match self.cache.put(key, output) {
                Ok(outcome) => debug!(job_id = %job.job_id, key = %key, ?outcome, "Result cached"),
                Err(CacheError::Conflict { key }) => {
                    warn!(job_id = %job.job_id, key = %key, "Cached result conflicts with new result, keeping existing");
                }
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Cache write failed"),
            }
        }

        drop(guard);
        tx.send_replace(Some(result.clone()));
        result
    }

    fn finish(&self, job_id: &str, execution: Execution) {
        let event = {
            let mut state = self.lock_state();
            let Some(record) = state.jobs.get_mut(job_id) else {
                error!(job_id = %job_id, "Running job vanished from job table");
                return;
            };

            let applied = match execution {
                Execution::CacheHit(result) => record.job.succeed(result, true),
                Execution::Ran(Ok(result)) => record.job.succeed(result, false),
                Execution::Ran(Err(e)) => record.job.fail(ErrorKind::ToolExecutionError, e.to_string()),
                Execution::Cancelled => record.job.fail(ErrorKind::Cancelled, "cancelled while running"),
            };
            if let Err(status) = applied {
                error!(job_id = %job_id, %status, "Job already terminal");
                return;
            }
            record.updates.send_replace(record.job.clone());

            let job = &record.job;
            let event = if job.status == JobStatus::Succeeded {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                if job.cache_hit {
                    info!(job_id = %job_id, tool = %job.tool_name, "Job served from cache");
                    job_event(EventType::CacheHit, job)
                } else {
                    info!(job_id = %job_id, tool = %job.tool_name, "Job completed");
                    job_event(EventType::JobCompleted, job)
                }
            } else {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(job_id = %job_id, tool = %job.tool_name, reason = ?job.reason, "Job failed");
                job_event(EventType::JobFailed, job)
            };

            state.finished.push_back(job_id.to_string());
            while state.finished.len() > self.config.retained_jobs {
                let Some(evicted) = state.finished.pop_front() else {
                    break;
                };
                state.jobs.remove(&evicted);
                debug!(job_id = %evicted, "Finished job evicted");
            }
            event
        };
        self.publish(&event);
    }
}

/// Removes a single-flight registration when the leader finishes or is dropped.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<CacheKey, watch::Receiver<FlightOutcome>>>,
    key: &'a CacheKey,
    rx: watch::Receiver<FlightOutcome>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.get(self.key).is_some_and(|rx| rx.same_channel(&self.rx)) {
            flights.remove(self.key);
        }
    }
}

fn job_event(event_type: EventType, job: &Job) -> Event {
    let payload = json!({
        "job_id": job.job_id,
        "tool_name": job.tool_name,
        "project_id": job.project_id,
        "status": job.status,
        "cache_hit": job.cache_hit,
        "metrics": job.result.as_ref().map(|r| &r.metrics),
        "error_kind": job.error_kind,
        "reason": job.reason,
    });
    Event::new(event_type, job.project_id.clone(), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edaforge_abstraction::{ParamValue, SimulatedTool};
    use edaforge_cache::{CacheConfig, ResultCache};
    use std::time::Duration;

    fn params(level: i64) -> Parameters {
        let mut p = Parameters::new();
        p.insert("optimization_level".to_string(), ParamValue::Int(level));
        p
    }

    fn queue_with(tool: Arc<SimulatedTool>, config: QueueConfig) -> (TaskQueue, Arc<Notifier>) {
        let notifier = Arc::new(Notifier::new(64));
        let cache = Arc::new(ResultCache::new(CacheConfig::default()).unwrap());
        let queue = TaskQueue::new(
            config,
            Arc::new(ToolRegistry::with_builtin_tools()),
            tool,
            cache,
            Arc::clone(&notifier),
        );
        (queue, notifier)
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let tool = Arc::new(SimulatedTool::new());
        let (queue, _) = queue_with(Arc::clone(&tool), QueueConfig::default());
        assert!(!queue.is_running());
        assert!(queue.start());
        assert!(!queue.start());
        assert!(queue.is_running());

        let job_id = queue.add_task("verilator", params(2), "proj").await.unwrap();
        let job = queue.wait_for_completion(&job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(!job.cache_hit);
        assert!(job.result.unwrap().metrics.contains_key("execution_time"));
        assert_eq!(tool.invocations(), 1);
        queue.shutdown().await;
        assert!(!queue.is_running());
        assert!(!queue.start());
    }

    #[tokio::test]
    async fn test_second_identical_job_hits_cache() {
        let tool = Arc::new(SimulatedTool::new());
        let (queue, notifier) = queue_with(Arc::clone(&tool), QueueConfig::default());
        queue.start();
        let mut events = notifier.subscribe_channel("proj");

        let first = queue.add_task("verilator", params(1), "proj").await.unwrap();
        queue.wait_for_completion(&first).await.unwrap();
        let second = queue.add_task("verilator", params(1), "proj").await.unwrap();
        let job = queue.wait_for_completion(&second).await.unwrap();

        assert!(job.cache_hit);
        assert_eq!(tool.invocations(), 1);
        let types: Vec<_> = events.drain().into_iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::CacheHit));
        assert!(types.contains(&EventType::JobCompleted));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_tool_marks_job_failed() {
        let tool = Arc::new(SimulatedTool::new().failing("yosys"));
        let (queue, _) = queue_with(tool, QueueConfig::default());
        queue.start();

        let job_id = queue.add_task("yosys", Parameters::new(), "proj").await.unwrap();
        let job = queue.wait_for_completion(&job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind, Some(ErrorKind::ToolExecutionError));
        assert!(job.reason.unwrap().contains("simulated failure"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_submission_is_rejected() {
        let (queue, _) = queue_with(Arc::new(SimulatedTool::new()), QueueConfig::default());
        let err = queue.add_task("unknown_tool", Parameters::new(), "proj").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
        assert_eq!(queue.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_removes_it() {
        // Not started, so the job stays queued
        let (queue, _) = queue_with(Arc::new(SimulatedTool::new()), QueueConfig::default());
        let job_id = queue.add_task("verilator", params(0), "proj").await.unwrap();

        assert!(queue.cancel(&job_id));
        assert!(!queue.cancel(&job_id));
        assert_eq!(queue.get_status(&job_id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(queue.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_running_job_not_cancelled_by_default() {
        let tool = Arc::new(SimulatedTool::new().with_delay(Duration::from_millis(200)));
        let (queue, _) = queue_with(tool, QueueConfig::default());
        queue.start();

        let job_id = queue.add_task("verilator", params(3), "proj").await.unwrap();
        let mut status = queue.get_status(&job_id).unwrap().status;
        while status == JobStatus::Queued {
            time::sleep(Duration::from_millis(5)).await;
            status = queue.get_status(&job_id).unwrap().status;
        }

        assert!(!queue.cancel(&job_id));
        let job = queue.wait_for_completion(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_running_job_terminated_when_enabled() {
        let tool = Arc::new(SimulatedTool::new().with_delay(Duration::from_secs(30)));
        let config = QueueConfig { terminate_running_on_cancel: true, ..QueueConfig::default() };
        let (queue, _) = queue_with(tool, config);
        queue.start();

        let job_id = queue.add_task("verilator", params(3), "proj").await.unwrap();
        while queue.get_status(&job_id).unwrap().status == JobStatus::Queued {
            time::sleep(Duration::from_millis(5)).await;
        }

        assert!(queue.cancel(&job_id));
        let job = queue.wait_for_completion(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind, Some(ErrorKind::Cancelled));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_jobs_evicted_beyond_retention() {
        let config = QueueConfig { workers: 1, retained_jobs: 2, ..QueueConfig::default() };
        let (queue, _) = queue_with(Arc::new(SimulatedTool::new()), config);
        queue.start();

        let mut finished = Vec::new();
        for level in 0..4 {
            let job_id = queue.add_task("verilator", params(level), "proj").await.unwrap();
            let job = queue.wait_for_completion(&job_id).await.unwrap();
            assert_eq!(job.status, JobStatus::Succeeded);
            finished.push(job_id);
        }

        for job_id in &finished[..2] {
            assert_eq!(queue.get_status(job_id).unwrap_err().kind(), ErrorKind::NotFound);
        }
        for job_id in &finished[2..] {
            assert!(queue.get_status(job_id).unwrap().status.is_terminal());
        }
        assert_eq!(queue.inner.lock_state().jobs.len(), 2);
        assert_eq!(queue.stats().succeeded, 4);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_waiter_gets_snapshot_of_evicted_job() {
        let tool = Arc::new(SimulatedTool::new().with_delay(Duration::from_millis(50)));
        let config = QueueConfig { retained_jobs: 0, ..QueueConfig::default() };
        let (queue, _) = queue_with(tool, config);
        queue.start();

        let job_id = queue.add_task("yosys", params(1), "proj").await.unwrap();
        let job = queue.wait_for_completion(&job_id).await.unwrap();

        assert_eq!(job.job_id, job_id);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.result.is_some());
        assert_eq!(queue.get_status(&job_id).unwrap_err().kind(), ErrorKind::NotFound);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let tool = Arc::new(SimulatedTool::new().with_delay(Duration::from_secs(5)));
        let config = QueueConfig { tool_timeout_secs: Some(1), ..QueueConfig::default() };
        let (queue, _) = queue_with(tool, config);
        queue.start();

        let job_id = queue.add_task("verilator", params(1), "proj").await.unwrap();
        let job = queue.wait_for_completion(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.reason.unwrap().contains("timed out"));
        queue.shutdown().await;
    }
}
