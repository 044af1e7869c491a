//! Run options
//!
//! Resolves the options bag of a build run with priority:
//! command line > global settings > built-in defaults.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::defaults;
use crate::core::settings::Settings;

/// Upper bound on simultaneously running jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxWorkers {
    /// At most this many jobs at once
    Bounded(NonZeroUsize),
    /// As many jobs at once as were submitted
    Unbounded,
}

impl MaxWorkers {
    /// Switch value meaning "one worker per CPU core"
    pub const CPU_TOKEN: &'static str = "cpu";

    /// Switch value meaning "no bound"
    pub const UNBOUNDED_TOKEN: &'static str = "unbounded";

    /// One worker per CPU core
    pub fn cpu_count() -> Self {
        NonZeroUsize::new(num_cpus::get()).map_or(Self::Unbounded, Self::Bounded)
    }

    /// A fixed bound; `0` means unbounded
    pub fn bounded(count: usize) -> Self {
        NonZeroUsize::new(count).map_or(Self::Unbounded, Self::Bounded)
    }

    /// Parse a `--max-workers` switch value
    ///
    /// Accepts a positive integer, `cpu` or `unbounded`. Anything else
    /// (including `0`) falls back to unbounded. The fallback is kept for
    /// compatibility with existing invocations but is likely unintended,
    /// so it is logged.
    pub fn parse_switch(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(Self::CPU_TOKEN) {
            return Self::cpu_count();
        }
        if trimmed.eq_ignore_ascii_case(Self::UNBOUNDED_TOKEN) {
            return Self::Unbounded;
        }
        match trimmed.parse::<usize>().ok().and_then(NonZeroUsize::new) {
            Some(count) => Self::Bounded(count),
            None => {
                tracing::warn!(
                    "Unrecognized max-workers value '{value}', falling back to unbounded \
                     (expected a positive integer or '{}')",
                    Self::CPU_TOKEN
                );
                Self::Unbounded
            }
        }
    }

    /// Worker count for a run of `jobs_total` jobs
    pub fn limit(self, jobs_total: usize) -> usize {
        match self {
            Self::Bounded(count) => count.get().min(jobs_total),
            Self::Unbounded => jobs_total,
        }
    }
}

impl Default for MaxWorkers {
    fn default() -> Self {
        Self::cpu_count()
    }
}

impl fmt::Display for MaxWorkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(count) => write!(f, "{count}"),
            Self::Unbounded => f.write_str(Self::UNBOUNDED_TOKEN),
        }
    }
}

/// Immutable snapshot of the options an orchestrator run uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Requested worker bound
    pub max_workers: MaxWorkers,
    /// Run jobs concurrently; when false exactly one job runs at a time
    pub use_concurrency: bool,
    /// Publish an aggregate progress fraction
    pub estimate_progress: bool,
    /// How long a builder's `dispose` may take before it is abandoned
    pub dispose_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_workers: MaxWorkers::default(),
            use_concurrency: true,
            estimate_progress: false,
            dispose_grace: Duration::from_secs(defaults::DISPOSE_GRACE_SECS),
        }
    }
}

impl RunOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: MaxWorkers) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, use_concurrency: bool) -> Self {
        self.use_concurrency = use_concurrency;
        self
    }

    #[must_use]
    pub fn with_estimate_progress(mut self, estimate_progress: bool) -> Self {
        self.estimate_progress = estimate_progress;
        self
    }

    #[must_use]
    pub fn with_dispose_grace(mut self, dispose_grace: Duration) -> Self {
        self.dispose_grace = dispose_grace;
        self
    }

    /// The concurrency bound actually applied to a run of `jobs_total` jobs
    ///
    /// Always at least 1 when there is work, and exactly 1 when concurrency
    /// is disabled.
    pub fn effective_workers(&self, jobs_total: usize) -> usize {
        if jobs_total == 0 {
            return 0;
        }
        if !self.use_concurrency {
            return 1;
        }
        self.max_workers.limit(jobs_total).max(1)
    }
}

/// Where a resolved option value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionSource {
    /// Command-line switch (highest priority)
    Cli,
    /// Global settings file
    Settings,
    /// Built-in default (lowest priority)
    Default,
}

/// Raw switches as given on the command line
#[derive(Debug, Clone, Default)]
pub struct SwitchOverrides {
    pub max_workers: Option<String>,
    pub no_multithreading: bool,
    pub estimate_progress: bool,
    pub silent: bool,
    pub auto_close: bool,
    pub dispose_grace_secs: Option<u64>,
}

/// The options bag of a build run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOptions {
    pub max_workers: MaxWorkers,
    pub use_concurrency: bool,
    pub estimate_progress: bool,
    pub silent: bool,
    pub auto_close: bool,
    pub dispose_grace: Duration,
    /// Source of the max-workers value
    pub max_workers_source: OptionSource,
}

impl SwitchOptions {
    /// Resolve switches against the global settings
    pub fn resolve(overrides: &SwitchOverrides, settings: &Settings) -> Self {
        let (max_workers, max_workers_source) = match (
            overrides.max_workers.as_deref(),
            settings.build.max_workers.as_ref(),
        ) {
            (Some(value), _) => (MaxWorkers::parse_switch(value), OptionSource::Cli),
            (None, Some(setting)) => (
                MaxWorkers::parse_switch(&setting.to_string()),
                OptionSource::Settings,
            ),
            (None, None) => (MaxWorkers::default(), OptionSource::Default),
        };

        let use_concurrency = if overrides.no_multithreading {
            false
        } else {
            settings.build.use_concurrency.unwrap_or(true)
        };

        let estimate_progress = overrides.estimate_progress
            || settings.build.estimate_progress.unwrap_or(false);

        let silent = overrides.silent || settings.output.silent.unwrap_or(false);
        let auto_close = overrides.auto_close || settings.output.auto_close.unwrap_or(false);

        let dispose_grace = Duration::from_secs(
            overrides
                .dispose_grace_secs
                .or(settings.build.dispose_grace_secs)
                .unwrap_or(defaults::DISPOSE_GRACE_SECS),
        );

        Self {
            max_workers,
            use_concurrency,
            estimate_progress,
            silent,
            auto_close,
            dispose_grace,
            max_workers_source,
        }
    }

    /// Snapshot of the options the orchestrator needs
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_workers: self.max_workers,
            use_concurrency: self.use_concurrency,
            estimate_progress: self.estimate_progress,
            dispose_grace: self.dispose_grace,
        }
    }

    /// Whether the host should wait for the user before exiting
    ///
    /// Silent runs never wait.
    pub fn waits_for_close(&self) -> bool {
        !self.silent && !self.auto_close
    }
}
