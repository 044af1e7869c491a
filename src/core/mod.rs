//! Core business logic module
//!
//! This module contains the build orchestration logic for indexhost.
//! Filesystem access goes through [`crate::infra`].
//!
//! # Submodules
//!
//! - [`job`] - Build jobs, job states and the builder trait
//! - [`state`] - Aggregate run state shared with observers
//! - [`orchestrator`] - Worker pool scheduling build jobs
//! - [`options`] - Run options and switch resolution
//! - [`settings`] - Global settings file
//! - [`index_config`] - Index configuration files
//! - [`catalog`] - The document catalog builder

pub mod catalog;
pub mod index_config;
pub mod job;
pub mod options;
pub mod orchestrator;
pub mod settings;
pub mod state;
