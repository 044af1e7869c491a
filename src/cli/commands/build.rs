//! Build command implementation
//!
//! Implements `indexhost build` to run one build job per configuration file.
//! The command only presents the run: it loads the configurations, hands the
//! jobs to the orchestrator and follows the aggregate state until Finished.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tokio::io::AsyncBufReadExt;

use crate::cli::output::{self, status};
use crate::core::index_config::load_job;
use crate::core::job::{BuildJob, JobOutcome};
use crate::core::options::{SwitchOptions, SwitchOverrides};
use crate::core::orchestrator::{Orchestrator, RunHandle};
use crate::core::settings::Settings;
use crate::core::state::AggregateState;
use crate::error::{ConfigLoadError, OrchestratorError};
use crate::infra::dirs::IndexhostDirs;

/// Execute the build command
pub async fn execute(configs: &[PathBuf], overrides: &SwitchOverrides) -> Result<()> {
    let dirs = IndexhostDirs::new();
    let settings = Settings::load(&dirs).context("Failed to load global settings")?;
    let options = SwitchOptions::resolve(overrides, &settings);
    tracing::info!(
        "Max workers: {} (from {:?}), multithreading: {}, progress estimate: {}",
        options.max_workers,
        options.max_workers_source,
        options.use_concurrency,
        options.estimate_progress
    );

    let (jobs, load_errors) = load_jobs(configs);
    if !options.silent {
        for error in &load_errors {
            eprintln!("{} {error}", status::ERROR);
        }
    }

    let handle = Orchestrator::new(options.run_options()).start(jobs);
    let display = (!options.silent).then(|| RunDisplay::new(options.estimate_progress));
    let state = follow(&handle, display.as_ref()).await;
    if let Some(display) = &display {
        display.finish();
    }

    let escalation = handle.wait().await.err();
    if let Some(OrchestratorError::DisposeFailed { failures, .. }) = &escalation {
        if !options.silent {
            for failure in failures {
                eprintln!("{} {}: {}", status::WARNING, failure.id, failure.reason);
            }
        }
    }

    if !options.silent {
        print_summary(&state);
    }

    if options.waits_for_close() {
        wait_for_enter().await;
    }

    run_verdict(&state, load_errors.len(), escalation)
}

/// Exit status of a finished run
///
/// Anything short of every configuration building is an error, so an
/// interrupted run never exits 0.
fn run_verdict(
    state: &AggregateState,
    load_errors: usize,
    escalation: Option<OrchestratorError>,
) -> Result<()> {
    if let Some(e) = escalation {
        return Err(e).context("Build run did not shut down cleanly");
    }
    let failed = state.jobs_failed() + load_errors;
    if failed > 0 {
        bail!("{failed} index build(s) failed");
    }
    let cancelled = state.jobs_cancelled();
    if cancelled > 0 {
        bail!("Build run was cancelled: {cancelled} index build(s) did not finish");
    }
    Ok(())
}

/// Load every distinct configuration, collecting the ones that fail
fn load_jobs(configs: &[PathBuf]) -> (Vec<BuildJob>, Vec<ConfigLoadError>) {
    let mut jobs = Vec::new();
    let mut errors = Vec::new();

    for path in unique_paths(configs) {
        match load_job(&path) {
            Ok(job) => {
                tracing::debug!("Loaded {} with {} input file(s)", job.id(), job.input_files().len());
                jobs.push(job);
            }
            Err(e) => {
                tracing::warn!("Skipping configuration: {e}");
                errors.push(e);
            }
        }
    }

    (jobs, errors)
}

/// Drop repeated configuration paths, keeping the first occurrence
fn unique_paths(configs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    configs
        .iter()
        .filter(|path| seen.insert(canonical(path)))
        .cloned()
        .collect()
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Follow the run until it is finished
///
/// The first Ctrl-C cancels the run; the run still ends through the normal
/// Finished path once every job has been disposed.
async fn follow(handle: &RunHandle, display: Option<&RunDisplay>) -> AggregateState {
    let mut rx = handle.subscribe();
    let mut interrupted = false;

    loop {
        let state = rx.borrow_and_update().clone();
        if let Some(display) = display {
            display.update(&state);
        }
        if state.is_finished() {
            return state;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return handle.finished().await;
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        tracing::warn!("Interrupted, waiting for running jobs to stop");
                        handle.cancel();
                    }
                    Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {e}"),
                }
            }
        }
    }
}

/// Progress display for a run
struct RunDisplay {
    bar: ProgressBar,
    estimate: bool,
}

impl RunDisplay {
    fn new(estimate: bool) -> Self {
        let bar = if estimate {
            output::create_progress_bar()
        } else {
            output::create_spinner("Starting")
        };
        Self { bar, estimate }
    }

    fn update(&self, state: &AggregateState) {
        if self.estimate {
            if let Some(fraction) = state.progress_fraction() {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                self.bar.set_position((fraction * 100.0).round() as u64);
            }
        }
        self.bar.set_message(format!(
            "{}/{} done, {} running, {} failed",
            state.jobs_completed(),
            state.jobs_total(),
            state.running(),
            state.jobs_failed()
        ));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn print_summary(state: &AggregateState) {
    for job in state.jobs() {
        match &job.outcome {
            Some(JobOutcome::Succeeded) => println!("{} {}", status::SUCCESS, job.id),
            Some(JobOutcome::Failed(e)) => println!("{} {}: {e}", status::ERROR, job.id),
            Some(JobOutcome::Cancelled) => println!("{} {}: cancelled", status::WARNING, job.id),
            None => println!("{} {}: {}", status::INFO, job.id, job.state),
        }
    }

    println!(
        "\n{} succeeded, {} failed, {} cancelled",
        state.jobs_succeeded(),
        state.jobs_failed(),
        state.jobs_cancelled()
    );
}

async fn wait_for_enter() {
    println!("\nPress Enter to exit");
    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if let Err(e) = stdin.read_line(&mut line).await {
        tracing::debug!("Could not read from stdin: {e}");
    }
}
