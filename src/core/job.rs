//! Build jobs and their lifecycle
//!
//! A [`BuildJob`] is one independent unit of index-building work derived
//! from a single configuration file. It owns an opaque [`IndexBuilder`]
//! that does the actual work; the orchestrator drives the builder through
//! `run` and `dispose` and never looks inside it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::state::StatePublisher;
use crate::error::JobError;

/// Identity of a job: the path of the configuration it was loaded from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(PathBuf);

impl JobId {
    /// Create a job id from a configuration path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The configuration path this id names
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a job
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}` or
/// `Pending -> Cancelled`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal lifecycle transition
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Cancelled) => true,
            (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress reported by a single job
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Progress {
    /// The job has not said how far along it is
    #[default]
    Indeterminate,
    /// Fraction done, clamped to `0.0..=1.0`
    Fraction(f64),
}

impl Progress {
    /// Create a fraction, clamping to `0.0..=1.0` (NaN counts as 0)
    pub fn fraction(value: f64) -> Self {
        if value.is_nan() {
            Self::Fraction(0.0)
        } else {
            Self::Fraction(value.clamp(0.0, 1.0))
        }
    }

    /// Contribution to an aggregate estimate; indeterminate counts as nothing done
    pub fn as_estimate(self) -> f64 {
        match self {
            Self::Indeterminate => 0.0,
            Self::Fraction(f) => f,
        }
    }
}

/// Final outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobError),
    Cancelled,
}

impl JobOutcome {
    /// Map the return value of [`IndexBuilder::run`] to an outcome
    pub fn from_run(result: Result<(), JobError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(JobError::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }

    /// The terminal lifecycle state this outcome corresponds to
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The opaque engine-side builder of one index
///
/// Implementations do blocking work; the orchestrator calls both methods on
/// a blocking thread. Cancellation is cooperative: `run` should poll
/// [`JobContext::is_cancelled`] and return `Err(JobError::Cancelled)` once it
/// stops early.
pub trait IndexBuilder: Send + 'static {
    /// Build the index
    fn run(&mut self, ctx: &JobContext) -> Result<(), JobError>;

    /// Release every resource held by the builder
    ///
    /// Consumes the builder, so it can only ever be called once.
    fn dispose(self: Box<Self>) -> Result<(), JobError>;
}

/// A build job: identity, inputs and the builder that processes them
pub struct BuildJob {
    id: JobId,
    input_files: Vec<PathBuf>,
    builder: Box<dyn IndexBuilder>,
}

impl BuildJob {
    /// Create a new build job
    pub fn new(
        id: impl Into<JobId>,
        input_files: Vec<PathBuf>,
        builder: Box<dyn IndexBuilder>,
    ) -> Self {
        Self {
            id: id.into(),
            input_files,
            builder,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Files this job will process
    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Split the job into its identity and its builder
    pub(crate) fn into_parts(self) -> (JobId, Box<dyn IndexBuilder>) {
        (self.id, self.builder)
    }
}

impl fmt::Debug for BuildJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildJob")
            .field("id", &self.id)
            .field("input_files", &self.input_files.len())
            .finish_non_exhaustive()
    }
}

impl From<PathBuf> for JobId {
    fn from(value: PathBuf) -> Self {
        Self(value)
    }
}

impl From<&Path> for JobId {
    fn from(value: &Path) -> Self {
        Self(value.to_path_buf())
    }
}

/// Handle given to a running builder
///
/// Carries the run's cancellation token and a channel back to the
/// aggregate state for progress reports.
#[derive(Clone)]
pub struct JobContext {
    index: usize,
    cancel: CancellationToken,
    publisher: Option<Arc<StatePublisher>>,
}

impl JobContext {
    pub(crate) fn new(index: usize, cancel: CancellationToken, publisher: Arc<StatePublisher>) -> Self {
        Self {
            index,
            cancel,
            publisher: Some(publisher),
        }
    }

    /// A context that is not attached to any orchestrator run
    ///
    /// Progress reports are dropped. Useful for driving a builder directly.
    pub fn standalone(cancel: CancellationToken) -> Self {
        Self {
            index: 0,
            cancel,
            publisher: None,
        }
    }

    /// Whether cancellation of the run has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report the fraction of work done (clamped to `0.0..=1.0`)
    pub fn report_progress(&self, fraction: f64) {
        self.report(Progress::fraction(fraction));
    }

    /// Report that the job cannot currently estimate its progress
    pub fn report_indeterminate(&self) {
        self.report(Progress::Indeterminate);
    }

    fn report(&self, progress: Progress) {
        if let Some(publisher) = &self.publisher {
            publisher.record_progress(self.index, progress);
        }
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("index", &self.index)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
