//! Indexhost - concurrent index build runner
//!
//! This library runs independent index build jobs under a worker bound and
//! exposes the aggregate state of the run to observers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Jobs, orchestration and configuration logic
//! - [`infra`] - Infrastructure layer (filesystem, directories)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
