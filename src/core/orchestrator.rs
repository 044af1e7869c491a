//! Build job orchestration
//!
//! Runs a set of independent [`BuildJob`]s under a worker bound:
//!
//! - a fixed pool of workers pulls jobs from a FIFO queue, so admission
//!   follows submission order and at most `effective_workers` jobs run
//! - each builder's `run` and `dispose` execute on a blocking thread
//! - one job's failure (or panic) never touches its siblings
//! - every job is disposed exactly once before the run reports Finished,
//!   whether it succeeded, failed, or was cancelled before it started
//!
//! Cancellation is cooperative. Jobs still queued move to Cancelled as soon
//! as the token fires. Running builders see the cancelled token through
//! their [`JobContext`] and the run waits for them; a builder that ignores
//! cancellation holds the run open.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::job::{BuildJob, IndexBuilder, JobContext, JobId, JobOutcome};
use crate::core::options::RunOptions;
use crate::core::state::{AggregateState, JobFailure, StatePublisher};
use crate::error::{DisposeFailure, DisposeFailureReason, JobError, OrchestratorError};

/// Outcome of one job in an [`OrchestrationResult`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: JobId,
    pub outcome: JobOutcome,
}

/// Per-job outcomes of a finished run, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestrationResult {
    reports: Vec<JobReport>,
}

impl OrchestrationResult {
    fn from_state(state: &AggregateState) -> Self {
        let reports = state
            .jobs()
            .iter()
            .map(|job| JobReport {
                id: job.id.clone(),
                outcome: job.outcome.clone().unwrap_or(JobOutcome::Cancelled),
            })
            .collect();
        Self { reports }
    }

    pub fn reports(&self) -> &[JobReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Callback fired once when a run reaches Finished
pub type FinishedHook = Box<dyn FnOnce(&AggregateState) + Send + 'static>;

/// Schedules build jobs under a worker bound
pub struct Orchestrator {
    options: RunOptions,
    on_finished: Option<FinishedHook>,
}

impl Orchestrator {
    /// Create an orchestrator for one run with `options`
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            on_finished: None,
        }
    }

    /// Register a callback fired exactly once when the run is finished
    #[must_use]
    pub fn on_finished(mut self, hook: impl FnOnce(&AggregateState) + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(hook));
        self
    }

    /// Start running `jobs` and return immediately
    ///
    /// Must be called from within a Tokio runtime. With no jobs the returned
    /// handle already reports Finished.
    pub fn start(self, jobs: Vec<BuildJob>) -> RunHandle {
        let Self {
            options,
            on_finished,
        } = self;

        let cancel = CancellationToken::new();
        let state = AggregateState::new(jobs.iter().map(|job| job.id().clone()), options.estimate_progress);
        let publisher = Arc::new(StatePublisher::new(state));
        let receiver = publisher.subscribe();
        publisher.begin();

        let task = if jobs.is_empty() {
            debug!("No jobs submitted, run finished immediately");
            publisher.finish();
            if let Some(hook) = on_finished {
                hook(&publisher.snapshot());
            }
            tokio::spawn(async { Ok(OrchestrationResult::default()) })
        } else {
            tokio::spawn(drive(jobs, options, publisher, cancel.clone(), on_finished))
        };

        RunHandle {
            state: receiver,
            cancel,
            task,
        }
    }
}

/// Handle to a started run
///
/// All queries are non-blocking snapshots of the aggregate state.
#[derive(Debug)]
pub struct RunHandle {
    state: watch::Receiver<AggregateState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<OrchestrationResult, OrchestratorError>>,
}

impl RunHandle {
    /// Snapshot of the aggregate state
    pub fn state(&self) -> AggregateState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_finished()
    }

    /// Aggregate progress, `None` when estimation is disabled
    pub fn progress_fraction(&self) -> Option<f64> {
        self.state.borrow().progress_fraction()
    }

    /// Failed jobs so far, in submission order
    pub fn errors(&self) -> Vec<JobFailure> {
        self.state.borrow().errors()
    }

    /// A receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<AggregateState> {
        self.state.clone()
    }

    /// Request cooperative cancellation of every pending and running job
    ///
    /// Returns immediately; the run reports Finished once the running jobs
    /// have stopped and every job has been disposed.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the run is finished and return the final state
    pub async fn finished(&self) -> AggregateState {
        let mut rx = self.state.clone();
        let finished = rx.wait_for(AggregateState::is_finished).await.map(|state| state.clone());
        finished.unwrap_or_else(|_| self.state())
    }

    /// Wait for the run to end and collect its result
    pub async fn wait(self) -> Result<OrchestrationResult, OrchestratorError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(OrchestratorError::WorkerFailed(e.to_string())),
        }
    }
}

/// Run the worker pool to completion and publish Finished
async fn drive(
    jobs: Vec<BuildJob>,
    options: RunOptions,
    publisher: Arc<StatePublisher>,
    cancel: CancellationToken,
    on_finished: Option<FinishedHook>,
) -> Result<OrchestrationResult, OrchestratorError> {
    let total = jobs.len();
    let workers = options.effective_workers(total);
    info!("Starting {total} job(s) on {workers} worker(s)");

    let pool = WorkerPool::new(jobs, Arc::clone(&publisher), cancel, &options);

    let handles: Vec<_> = (0..workers)
        .map(|worker| tokio::spawn(pool.clone().work(worker)))
        .collect();

    // Pending jobs are cancelled as soon as the token fires, not once the
    // running ones have wound down
    let workers_done = futures::future::join_all(handles);
    tokio::pin!(workers_done);
    let joined = tokio::select! {
        joined = &mut workers_done => joined,
        () = pool.cancel.cancelled() => {
            pool.drain_pending().await;
            workers_done.await
        }
    };

    let mut worker_error = None;
    for joined in joined {
        if let Err(e) = joined {
            error!("Worker task failed: {e}");
            worker_error.get_or_insert_with(|| e.to_string());
        }
    }

    // A dead worker can leave jobs behind
    pool.drain_pending().await;

    publisher.finish();
    let state = publisher.snapshot();
    info!(
        "Run finished: {} succeeded, {} failed, {} cancelled",
        state.jobs_succeeded(),
        state.jobs_failed(),
        state.jobs_cancelled()
    );
    if let Some(hook) = on_finished {
        hook(&state);
    }

    if let Some(e) = worker_error {
        return Err(OrchestratorError::WorkerFailed(e));
    }

    let result = OrchestrationResult::from_state(&state);
    let failures = std::mem::take(&mut *pool.dispose_failures.lock().await);
    if failures.is_empty() {
        Ok(result)
    } else {
        Err(OrchestratorError::DisposeFailed { failures, result })
    }
}

#[derive(Clone)]
struct WorkerPool {
    queue: Arc<Mutex<VecDeque<(usize, BuildJob)>>>,
    publisher: Arc<StatePublisher>,
    cancel: CancellationToken,
    dispose_grace: Duration,
    dispose_failures: Arc<Mutex<Vec<DisposeFailure>>>,
}

impl WorkerPool {
    fn new(
        jobs: Vec<BuildJob>,
        publisher: Arc<StatePublisher>,
        cancel: CancellationToken,
        options: &RunOptions,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(jobs.into_iter().enumerate().collect())),
            publisher,
            cancel,
            dispose_grace: options.dispose_grace,
            dispose_failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn work(self, worker: usize) {
        while let Some((index, job)) = self.next_job().await {
            self.execute(worker, index, job).await;
        }
        if self.cancel.is_cancelled() {
            debug!("Worker {worker} stopping: run cancelled");
        } else {
            debug!("Worker {worker} stopping: queue empty");
        }
    }

    /// Pop the next job and mark it Running
    ///
    /// The token is checked and the job admitted while the queue is locked,
    /// so once `drain_pending` holds the lock no job can start.
    async fn next_job(&self) -> Option<(usize, BuildJob)> {
        let mut queue = self.queue.lock().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        let (index, job) = queue.pop_front()?;
        self.publisher.admit(index);
        Some((index, job))
    }

    /// Cancel and dispose every job still queued
    async fn drain_pending(&self) {
        let pending: Vec<_> = self.queue.lock().await.drain(..).collect();
        if !pending.is_empty() {
            debug!("Cancelling {} job(s) that never started", pending.len());
        }
        for (index, job) in pending {
            self.cancel_pending(index, job).await;
        }
    }

    async fn execute(&self, worker: usize, index: usize, job: BuildJob) {
        let (id, builder) = job.into_parts();
        debug!("Worker {worker} running job {id}");

        let ctx = JobContext::new(index, self.cancel.clone(), Arc::clone(&self.publisher));
        let (builder, outcome) = run_builder(builder, ctx).await;

        match &outcome {
            JobOutcome::Succeeded => info!("Job {id} succeeded"),
            JobOutcome::Failed(e) => warn!("Job {id} failed: {e}"),
            JobOutcome::Cancelled => info!("Job {id} cancelled"),
        }

        match builder {
            Some(builder) => self.dispose(&id, builder).await,
            None => {
                self.record_dispose_failure(
                    &id,
                    DisposeFailureReason::Panicked("builder lost with its thread".to_string()),
                )
                .await;
            }
        }
        self.publisher.complete(index, outcome);
    }

    /// Pending -> Cancelled without ever running
    async fn cancel_pending(&self, index: usize, job: BuildJob) {
        let (id, builder) = job.into_parts();
        debug!("Job {id} cancelled before it started");
        self.dispose(&id, builder).await;
        self.publisher.complete(index, JobOutcome::Cancelled);
    }

    /// Dispose a builder, giving up after the grace period
    async fn dispose(&self, id: &JobId, builder: Box<dyn IndexBuilder>) {
        let handle = tokio::task::spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(move || builder.dispose()))
        });

        let reason = match tokio::time::timeout(self.dispose_grace, handle).await {
            Ok(Ok(Ok(Ok(())))) => {
                debug!("Disposed job {id}");
                return;
            }
            Ok(Ok(Ok(Err(e)))) => DisposeFailureReason::Error(e),
            Ok(Ok(Err(payload))) => DisposeFailureReason::Panicked(panic_message(payload.as_ref())),
            Ok(Err(e)) => DisposeFailureReason::Panicked(e.to_string()),
            Err(_) => DisposeFailureReason::TimedOut(self.dispose_grace),
        };
        self.record_dispose_failure(id, reason).await;
    }

    async fn record_dispose_failure(&self, id: &JobId, reason: DisposeFailureReason) {
        warn!("Job {id}: {reason}");
        self.dispose_failures.lock().await.push(DisposeFailure {
            id: id.clone(),
            reason,
        });
    }
}

/// Run a builder on a blocking thread, turning a panic into a failure
///
/// The builder is handed back for disposal unless its thread was lost.
async fn run_builder(
    mut builder: Box<dyn IndexBuilder>,
    ctx: JobContext,
) -> (Option<Box<dyn IndexBuilder>>, JobOutcome) {
    let handle = tokio::task::spawn_blocking(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| builder.run(&ctx)));
        (builder, result)
    });

    match handle.await {
        Ok((builder, Ok(result))) => (Some(builder), JobOutcome::from_run(result)),
        Ok((builder, Err(payload))) => (
            Some(builder),
            JobOutcome::Failed(JobError::Panicked(panic_message(payload.as_ref()))),
        ),
        Err(e) => (None, JobOutcome::Failed(JobError::Panicked(e.to_string()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
