//! Error types for indexhost
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::job::JobId;
use crate::core::orchestrator::OrchestrationResult;

/// Configuration file loading errors
///
/// Reported per file. A bad configuration never prevents the other
/// configurations of the same run from being built.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// Configuration file does not exist
    #[error("Configuration not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("Failed to read configuration '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Configuration file is not valid TOML or misses required fields
    #[error("Failed to parse configuration '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// A `${VAR}` reference names a variable that is not set
    #[error("Configuration '{path}': '{key}' references unset variable '{variable}'")]
    UnsetVariable {
        path: PathBuf,
        key: String,
        variable: String,
    },

    /// Configuration parsed but holds invalid values
    #[error("Invalid configuration '{path}': {message}")]
    Invalid { path: PathBuf, message: String },

    /// An input path named by the configuration does not exist
    #[error("Input '{input}' of configuration '{path}' does not exist")]
    InputMissing { path: PathBuf, input: PathBuf },

    /// Enumerating the input files failed
    #[error("Failed to enumerate inputs of '{path}': {source}")]
    Inputs {
        path: PathBuf,
        source: FilesystemError,
    },
}

/// Errors raised by a single build job
///
/// These never cross the orchestrator boundary as errors: they are recorded
/// as the job's outcome and in the aggregate error list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The builder reported a failure
    #[error("{0}")]
    Failed(String),

    /// IO error while building
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// The builder observed cancellation and stopped
    #[error("Job was cancelled")]
    Cancelled,

    /// The builder panicked
    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// A job whose disposal did not complete cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposeFailure {
    /// Job whose builder failed to dispose
    pub id: JobId,
    /// What went wrong
    pub reason: DisposeFailureReason,
}

/// Why a disposal was reported as failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisposeFailureReason {
    /// `dispose` returned an error
    #[error("dispose failed: {0}")]
    Error(JobError),

    /// `dispose` panicked
    #[error("dispose panicked: {0}")]
    Panicked(String),

    /// `dispose` did not return within the grace period
    #[error("dispose did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Internal orchestrator failures
///
/// Escalated from `RunHandle::wait` only after every job has been disposed
/// (or its disposal abandoned after the grace period).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// One or more builders could not be disposed
    #[error("{} job(s) failed to dispose cleanly", failures.len())]
    DisposeFailed {
        failures: Vec<DisposeFailure>,
        result: OrchestrationResult,
    },

    /// The run task itself died
    #[error("Orchestrator worker failed: {0}")]
    WorkerFailed(String),
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to walk a directory tree
    #[error("Failed to walk '{path}': {error}")]
    Walk { path: PathBuf, error: String },
}

/// Global settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write the settings file
    #[error("Failed to access settings file '{path}': {error}")]
    Io { path: String, error: String },

    /// Failed to parse the settings file
    #[error("Failed to parse settings file '{path}': {error}")]
    Parse { path: String, error: String },
}
