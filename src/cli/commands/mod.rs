//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod check;
pub mod new;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::config::defaults;
use crate::core::options::SwitchOverrides;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build indexes from configuration files
    Build {
        /// Index configuration files
        #[arg(required = true, value_name = "CONFIG")]
        configs: Vec<PathBuf>,

        /// Print nothing and exit when done (implies --auto-close)
        #[arg(long)]
        silent: bool,

        /// Exit as soon as the run is finished instead of waiting for Enter
        #[arg(long)]
        auto_close: bool,

        /// Show an aggregate progress estimate
        #[arg(long)]
        estimate_progress: bool,

        /// Run one job at a time
        #[arg(long)]
        no_multithreading: bool,

        /// Maximum concurrent jobs: a number, `cpu` or `unbounded`
        #[arg(long, value_name = "N|cpu", env = defaults::ENV_MAX_WORKERS)]
        max_workers: Option<String>,

        /// Seconds a job may take to release its resources
        #[arg(long, value_name = "SECS")]
        dispose_grace: Option<u64>,
    },

    /// Validate configuration files without building
    Check {
        /// Index configuration files
        #[arg(required = true, value_name = "CONFIG")]
        configs: Vec<PathBuf>,
    },

    /// Create a new index configuration
    New {
        /// Where to write the configuration
        path: PathBuf,

        /// Index name
        #[arg(long)]
        name: String,

        /// Input file or directory (repeatable)
        #[arg(long = "input", required = true, value_name = "DIR")]
        inputs: Vec<PathBuf>,

        /// Accepted file extension (repeatable, default: every file)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Output catalog file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

impl Commands {
    /// Execute the command
    ///
    /// `quiet` is the global `--quiet` flag; for `build` it acts as `--silent`.
    pub async fn run(self, quiet: bool) -> Result<()> {
        match self {
            Self::Build {
                configs,
                silent,
                auto_close,
                estimate_progress,
                no_multithreading,
                max_workers,
                dispose_grace,
            } => {
                let overrides = SwitchOverrides {
                    max_workers,
                    no_multithreading,
                    estimate_progress,
                    silent: silent || quiet,
                    auto_close,
                    dispose_grace_secs: dispose_grace,
                };
                build::execute(&configs, &overrides).await
            }
            Self::Check { configs } => check::execute(&configs, quiet),
            Self::New {
                path,
                name,
                inputs,
                extensions,
                output,
                force,
            } => {
                let options = new::NewOptions {
                    name,
                    inputs,
                    extensions,
                    output,
                    force,
                };
                new::execute(&path, options, quiet)
            }
        }
    }
}
