//! Aggregate run state
//!
//! [`AggregateState`] is the orchestrator-wide view of one run: phase,
//! per-job status, counters, errors and the progress estimate. It is only
//! mutated by the orchestrator, through [`StatePublisher`], which funnels
//! every change through a single `watch` channel so observers never see two
//! completions out of order.

use tokio::sync::watch;

use crate::core::job::{JobId, JobOutcome, JobState, Progress};
use crate::error::JobError;

/// Phase of the whole run
///
/// `NotStarted -> Running -> Finished`. Finished is published once, after
/// every job reached a terminal state and was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    NotStarted,
    Running,
    Finished,
}

/// Status of a single job inside the aggregate view
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// Job identity
    pub id: JobId,
    /// Current lifecycle state
    pub state: JobState,
    /// Last progress reported by the job
    pub progress: Progress,
    /// Outcome, once the job is terminal
    pub outcome: Option<JobOutcome>,
}

/// A failed job and its error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub id: JobId,
    pub error: JobError,
}

/// Orchestrator-wide state of one run
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    phase: RunPhase,
    jobs: Vec<JobStatus>,
    jobs_completed: usize,
    jobs_failed: usize,
    jobs_cancelled: usize,
    running: usize,
    peak_running: usize,
    estimate_progress: bool,
}

impl AggregateState {
    /// Create the state for a run over `ids`, in submission order
    pub fn new(ids: impl IntoIterator<Item = JobId>, estimate_progress: bool) -> Self {
        let jobs = ids
            .into_iter()
            .map(|id| JobStatus {
                id,
                state: JobState::Pending,
                progress: Progress::Indeterminate,
                outcome: None,
            })
            .collect();

        Self {
            jobs,
            estimate_progress,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// True from start until the run is finished
    pub fn is_running(&self) -> bool {
        self.phase == RunPhase::Running
    }

    /// True once every job is terminal and disposed
    pub fn is_finished(&self) -> bool {
        self.phase == RunPhase::Finished
    }

    pub fn jobs(&self) -> &[JobStatus] {
        &self.jobs
    }

    pub fn jobs_total(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs that reached a terminal state (succeeded, failed or cancelled)
    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed
    }

    pub fn jobs_failed(&self) -> usize {
        self.jobs_failed
    }

    pub fn jobs_cancelled(&self) -> usize {
        self.jobs_cancelled
    }

    pub fn jobs_succeeded(&self) -> usize {
        self.jobs_completed - self.jobs_failed - self.jobs_cancelled
    }

    /// Jobs currently in the `Running` state
    pub fn running(&self) -> usize {
        self.running
    }

    /// Highest number of simultaneously running jobs seen during the run
    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    /// Failed jobs with their errors, in submission order
    pub fn errors(&self) -> Vec<JobFailure> {
        self.jobs
            .iter()
            .filter_map(|job| match &job.outcome {
                Some(JobOutcome::Failed(error)) => Some(JobFailure {
                    id: job.id.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Best-effort fraction of the admitted work that is done
    ///
    /// `None` when progress estimation is off; that means "unknown", not 0%.
    /// Only jobs that have been admitted count: terminal jobs count as done
    /// and running jobs contribute their own fraction (indeterminate counts
    /// as 0). Pending jobs are left out, so the value is 0 until a job runs.
    pub fn progress_fraction(&self) -> Option<f64> {
        if !self.estimate_progress {
            return None;
        }
        if self.jobs.is_empty() {
            return Some(if self.is_finished() { 1.0 } else { 0.0 });
        }

        let (sum, admitted) = self
            .jobs
            .iter()
            .filter_map(|job| match job.state {
                JobState::Pending => None,
                JobState::Running => Some(job.progress.as_estimate()),
                JobState::Succeeded | JobState::Failed | JobState::Cancelled => Some(1.0),
            })
            .fold((0.0, 0_usize), |(sum, n), value| (sum + value, n + 1));

        if admitted == 0 {
            return Some(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Some(sum / admitted as f64)
    }

    /// Enter the `Running` phase
    pub(crate) fn begin(&mut self) -> bool {
        if self.phase != RunPhase::NotStarted {
            return false;
        }
        self.phase = RunPhase::Running;
        true
    }

    /// Move job `index` from `Pending` to `Running`
    pub(crate) fn admit(&mut self, index: usize) -> bool {
        if !self.transition(index, JobState::Running) {
            return false;
        }
        self.running += 1;
        self.peak_running = self.peak_running.max(self.running);
        true
    }

    /// Record a progress report from a running job
    pub(crate) fn record_progress(&mut self, index: usize, progress: Progress) -> bool {
        if self.phase != RunPhase::Running {
            return false;
        }
        match self.jobs.get_mut(index) {
            Some(job) if job.state == JobState::Running && job.progress != progress => {
                job.progress = progress;
                true
            }
            _ => false,
        }
    }

    /// Move job `index` into the terminal state matching `outcome`
    pub(crate) fn complete(&mut self, index: usize, outcome: JobOutcome) -> bool {
        let was_running = self
            .jobs
            .get(index)
            .is_some_and(|job| job.state == JobState::Running);

        if !self.transition(index, outcome.state()) {
            return false;
        }

        if was_running {
            self.running -= 1;
        }
        self.jobs_completed += 1;
        match &outcome {
            JobOutcome::Succeeded => {}
            JobOutcome::Failed(_) => self.jobs_failed += 1,
            JobOutcome::Cancelled => self.jobs_cancelled += 1,
        }

        let job = &mut self.jobs[index];
        if outcome.is_success() {
            job.progress = Progress::Fraction(1.0);
        }
        job.outcome = Some(outcome);
        true
    }

    /// Enter the `Finished` phase; the state is frozen afterwards
    pub(crate) fn finish(&mut self) -> bool {
        if self.phase == RunPhase::Finished {
            return false;
        }
        if let Some(job) = self.jobs.iter().find(|job| !job.state.is_terminal()) {
            tracing::warn!("Finishing run while job {} is still {}", job.id, job.state);
        }
        self.phase = RunPhase::Finished;
        true
    }

    fn transition(&mut self, index: usize, next: JobState) -> bool {
        if self.phase != RunPhase::Running {
            tracing::warn!("Ignoring job transition to {next} outside of a running run");
            return false;
        }
        let Some(job) = self.jobs.get_mut(index) else {
            tracing::warn!("Ignoring transition of unknown job #{index}");
            return false;
        };
        if !job.state.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal transition of job {}: {} -> {}",
                job.id,
                job.state,
                next
            );
            return false;
        }
        tracing::debug!("Job {}: {} -> {}", job.id, job.state, next);
        job.state = next;
        true
    }
}

/// The single serialization point for [`AggregateState`] mutations
///
/// Every change goes through `watch::Sender::send_if_modified`, so it is
/// applied atomically and published to all subscribers.
#[derive(Debug)]
pub(crate) struct StatePublisher {
    tx: watch::Sender<AggregateState>,
}

impl StatePublisher {
    pub(crate) fn new(state: AggregateState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<AggregateState> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> AggregateState {
        self.tx.borrow().clone()
    }

    pub(crate) fn begin(&self) -> bool {
        self.apply(AggregateState::begin)
    }

    pub(crate) fn admit(&self, index: usize) -> bool {
        self.apply(|state| state.admit(index))
    }

    pub(crate) fn record_progress(&self, index: usize, progress: Progress) -> bool {
        self.apply(|state| state.record_progress(index, progress))
    }

    pub(crate) fn complete(&self, index: usize, outcome: JobOutcome) -> bool {
        self.apply(|state| state.complete(index, outcome))
    }

    pub(crate) fn finish(&self) -> bool {
        self.apply(AggregateState::finish)
    }

    fn apply(&self, change: impl FnOnce(&mut AggregateState) -> bool) -> bool {
        let mut changed = false;
        self.tx.send_if_modified(|state| {
            changed = change(state);
            changed
        });
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<JobId> {
        (0..n).map(|i| JobId::new(format!("job-{i}.toml"))).collect()
    }

    fn running_state(n: usize, estimate: bool) -> AggregateState {
        let mut state = AggregateState::new(ids(n), estimate);
        assert!(state.begin());
        state
    }

    #[test]
    fn test_new_state_is_not_started() {
        let state = AggregateState::new(ids(3), true);
        assert_eq!(state.phase(), RunPhase::NotStarted);
        assert!(!state.is_running());
        assert!(!state.is_finished());
        assert_eq!(state.jobs_total(), 3);
        assert!(state.jobs().iter().all(|j| j.state == JobState::Pending));
    }

    #[test]
    fn test_counters_follow_outcomes() {
        let mut state = running_state(4, false);
        for i in 0..3 {
            assert!(state.admit(i));
        }
        assert_eq!(state.running(), 3);

        assert!(state.complete(0, JobOutcome::Succeeded));
        assert!(state.complete(1, JobOutcome::Failed(JobError::Failed("bad".into()))));
        assert!(state.complete(2, JobOutcome::Cancelled));
        assert!(state.complete(3, JobOutcome::Cancelled));

        assert_eq!(state.running(), 0);
        assert_eq!(state.peak_running(), 3);
        assert_eq!(state.jobs_completed(), 4);
        assert_eq!(state.jobs_failed(), 1);
        assert_eq!(state.jobs_cancelled(), 2);
        assert_eq!(state.jobs_succeeded(), 1);
    }

    #[test]
    fn test_terminal_job_cannot_change() {
        let mut state = running_state(1, false);
        assert!(state.admit(0));
        assert!(state.complete(0, JobOutcome::Succeeded));
        assert!(!state.complete(0, JobOutcome::Failed(JobError::Failed("late".into()))));
        assert!(!state.admit(0));
        assert_eq!(state.jobs_completed(), 1);
        assert_eq!(state.jobs_failed(), 0);
    }

    #[test]
    fn test_pending_job_cannot_succeed_without_running() {
        let mut state = running_state(1, false);
        assert!(!state.complete(0, JobOutcome::Succeeded));
        assert_eq!(state.jobs()[0].state, JobState::Pending);
    }

    #[test]
    fn test_finished_state_is_frozen() {
        let mut state = running_state(1, false);
        assert!(state.complete(0, JobOutcome::Cancelled));
        assert!(state.finish());
        assert!(state.is_finished());
        assert!(!state.finish());
        assert!(!state.admit(0));
        assert!(!state.record_progress(0, Progress::fraction(0.5)));
    }

    #[test]
    fn test_errors_are_in_submission_order() {
        let mut state = running_state(3, false);
        for i in 0..3 {
            state.admit(i);
        }
        state.complete(2, JobOutcome::Failed(JobError::Failed("third".into())));
        state.complete(1, JobOutcome::Succeeded);
        state.complete(0, JobOutcome::Failed(JobError::Failed("first".into())));

        let errors = state.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].id, JobId::new("job-0.toml"));
        assert_eq!(errors[1].id, JobId::new("job-2.toml"));
    }

    #[test]
    fn test_progress_is_none_without_estimation() {
        let mut state = running_state(2, false);
        state.admit(0);
        state.record_progress(0, Progress::fraction(0.5));
        assert_eq!(state.progress_fraction(), None);
    }

    #[test]
    fn test_progress_estimate() {
        let mut state = running_state(4, true);
        assert_eq!(state.progress_fraction(), Some(0.0));

        state.admit(0);
        state.admit(1);
        state.record_progress(0, Progress::fraction(0.5));
        // job 1 stays indeterminate and counts as 0
        assert_eq!(state.progress_fraction(), Some(0.25));

        state.complete(1, JobOutcome::Failed(JobError::Failed("x".into())));
        assert_eq!(state.progress_fraction(), Some(0.75));

        state.complete(0, JobOutcome::Succeeded);
        state.complete(2, JobOutcome::Cancelled);
        state.complete(3, JobOutcome::Cancelled);
        assert_eq!(state.progress_fraction(), Some(1.0));
    }

    #[test]
    fn test_progress_leaves_out_pending_jobs() {
        let mut state = running_state(4, true);
        state.admit(0);
        state.record_progress(0, Progress::fraction(0.5));
        // three jobs still queued do not dilute the running one
        assert_eq!(state.progress_fraction(), Some(0.5));

        state.complete(0, JobOutcome::Succeeded);
        assert_eq!(state.progress_fraction(), Some(1.0));
    }

    #[test]
    fn test_progress_ignored_for_pending_job() {
        let mut state = running_state(1, true);
        assert!(!state.record_progress(0, Progress::fraction(0.9)));
        assert_eq!(state.progress_fraction(), Some(0.0));
    }

    #[tokio::test]
    async fn test_publisher_notifies_subscribers() {
        let publisher = StatePublisher::new(AggregateState::new(ids(1), true));
        let mut rx = publisher.subscribe();

        assert!(publisher.begin());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_running());

        assert!(publisher.admit(0));
        assert!(publisher.complete(0, JobOutcome::Succeeded));
        assert!(publisher.finish());

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_finished());
        assert_eq!(publisher.snapshot().jobs_completed(), 1);
    }

    #[test]
    fn test_publisher_skips_notification_when_unchanged() {
        let publisher = StatePublisher::new(AggregateState::new(ids(1), true));
        let mut rx = publisher.subscribe();
        publisher.begin();
        rx.borrow_and_update();

        // pending job: progress report is not a change
        assert!(!publisher.record_progress(0, Progress::fraction(0.3)));
        assert!(!rx.has_changed().unwrap());
    }
}
