//! Test utilities for property-based testing
//!
//! This module provides generators for proptest and a scripted
//! [`IndexBuilder`](crate::core::job::IndexBuilder) for orchestrator tests.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use super::mock::Behavior;

    /// Generate a valid index name (lowercase alphanumeric with hyphens)
    pub fn index_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a `--max-workers` value the switch parser accepts as-is
    pub fn worker_switch() -> impl Strategy<Value = String> {
        prop_oneof![
            (1usize..512).prop_map(|n| n.to_string()),
            Just("cpu".to_string()),
            Just("unbounded".to_string()),
        ]
    }

    /// Generate a job script: mostly successes, some failures
    pub fn behavior() -> impl Strategy<Value = Behavior> {
        prop_oneof![
            3 => Just(Behavior::Succeed),
            1 => "[a-z]{1,8}".prop_map(Behavior::Fail),
        ]
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::core::job::{BuildJob, IndexBuilder, JobContext};
    use crate::error::JobError;

    /// What a [`ScriptedBuilder`] does when run
    #[derive(Debug, Clone)]
    pub enum Behavior {
        Succeed,
        Fail(String),
        Panic(String),
        /// Keep running until the job is cancelled
        UntilCancelled,
        /// Keep running until cancelled, then take this long to stop
        LingerAfterCancel(Duration),
    }

    /// What a [`ScriptedBuilder`] does when disposed
    #[derive(Debug, Clone)]
    pub enum DisposeBehavior {
        Clean,
        Fail(String),
        /// Block for this long before returning
        Hang(Duration),
    }

    /// Counts calls into one builder
    #[derive(Debug, Default)]
    pub struct Calls {
        runs: AtomicUsize,
        disposes: AtomicUsize,
    }

    impl Calls {
        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        pub fn disposes(&self) -> usize {
            self.disposes.load(Ordering::SeqCst)
        }
    }

    /// Tracks how many builders sharing it run at the same time
    #[derive(Debug, Default)]
    pub struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    /// Builder whose behavior is fixed up front
    #[derive(Debug)]
    pub struct ScriptedBuilder {
        behavior: Behavior,
        dispose: DisposeBehavior,
        delay: Duration,
        calls: Arc<Calls>,
        gauge: Option<Arc<Gauge>>,
    }

    impl ScriptedBuilder {
        pub fn new(behavior: Behavior) -> (Self, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            let builder = Self {
                behavior,
                dispose: DisposeBehavior::Clean,
                delay: Duration::ZERO,
                calls: Arc::clone(&calls),
                gauge: None,
            };
            (builder, calls)
        }

        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        #[must_use]
        pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
            self.gauge = Some(gauge);
            self
        }

        #[must_use]
        pub fn with_dispose(mut self, dispose: DisposeBehavior) -> Self {
            self.dispose = dispose;
            self
        }

        fn script(&self, ctx: &JobContext) -> Result<(), JobError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            ctx.report_progress(0.5);

            match &self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail(message) => Err(JobError::Failed(message.clone())),
                Behavior::Panic(message) => panic!("{message}"),
                Behavior::UntilCancelled => {
                    while !ctx.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    Err(JobError::Cancelled)
                }
                Behavior::LingerAfterCancel(linger) => {
                    while !ctx.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    std::thread::sleep(*linger);
                    Err(JobError::Cancelled)
                }
            }
        }
    }

    impl IndexBuilder for ScriptedBuilder {
        fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
            self.calls.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(gauge) = &self.gauge {
                gauge.enter();
            }

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.script(ctx)));

            if let Some(gauge) = &self.gauge {
                gauge.exit();
            }
            result.unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        }

        fn dispose(self: Box<Self>) -> Result<(), JobError> {
            self.calls.disposes.fetch_add(1, Ordering::SeqCst);
            match self.dispose {
                DisposeBehavior::Clean => Ok(()),
                DisposeBehavior::Fail(message) => Err(JobError::Failed(message)),
                DisposeBehavior::Hang(duration) => {
                    std::thread::sleep(duration);
                    Ok(())
                }
            }
        }
    }

    /// Wrap a scripted builder in a job named `name`
    pub fn scripted_job(name: &str, builder: ScriptedBuilder) -> BuildJob {
        BuildJob::new(name, Vec::new(), Box::new(builder))
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::options::MaxWorkers;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_index_name_generator(name in index_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_worker_switch_generator_is_never_a_fallback(value in worker_switch()) {
            let parsed = MaxWorkers::parse_switch(&value);
            if value == "unbounded" {
                prop_assert_eq!(parsed, MaxWorkers::Unbounded);
            } else if value != "cpu" {
                prop_assert_eq!(parsed.to_string(), value);
            }
        }
    }
}
