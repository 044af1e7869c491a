//! New command implementation
//!
//! Implements `indexhost new` to write a fresh index configuration.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::cli::output::status;
use crate::core::index_config::IndexConfig;
use crate::infra::filesystem;

/// Options of the new command
#[derive(Debug, Clone)]
pub struct NewOptions {
    /// Index name
    pub name: String,
    /// Input files or directories
    pub inputs: Vec<PathBuf>,
    /// Accepted extensions; a leading dot is stripped
    pub extensions: Vec<String>,
    /// Output catalog file
    pub output: Option<PathBuf>,
    /// Overwrite an existing configuration
    pub force: bool,
}

/// Execute the new command
pub fn execute(path: &Path, options: NewOptions, quiet: bool) -> Result<()> {
    if path.exists() && !options.force {
        bail!(
            "Configuration '{}' already exists. Use --force to overwrite.",
            path.display()
        );
    }

    let mut config = IndexConfig::new(options.name, options.inputs);
    config.index.output = options.output;
    config.input.extensions = options
        .extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_string())
        .collect();
    config.validate(path)?;

    let content = config
        .to_toml()
        .context("Failed to serialize configuration")?;
    filesystem::write_file(path, &content)?;

    tracing::info!("Created index configuration {}", path.display());
    if !quiet {
        println!(
            "{} Created configuration for index '{}' at {}",
            status::SUCCESS,
            config.index.name,
            path.display()
        );
    }
    Ok(())
}
