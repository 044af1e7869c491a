//! Check command implementation
//!
//! Implements `indexhost check` to validate configurations without building.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::cli::output::status;
use crate::core::catalog::Catalog;
use crate::core::index_config::LoadedConfig;

/// Execute the check command
pub fn execute(configs: &[PathBuf], quiet: bool) -> Result<()> {
    let mut invalid = 0;

    for path in configs {
        match LoadedConfig::load(path) {
            Ok(loaded) => {
                tracing::info!("Checked {}", path.display());
                if !quiet {
                    print_loaded(&loaded);
                }
            }
            Err(e) => {
                invalid += 1;
                eprintln!("{} {e}", status::ERROR);
            }
        }
    }

    if invalid > 0 {
        bail!("{invalid} of {} configuration(s) are invalid", configs.len());
    }
    Ok(())
}

fn print_loaded(loaded: &LoadedConfig) {
    println!(
        "{} {}: index '{}', {} input file(s) -> {}",
        status::SUCCESS,
        loaded.path.display(),
        loaded.config.index.name,
        loaded.input_files.len(),
        loaded.output.display()
    );

    if loaded.input_files.is_empty() {
        println!("  {} no input files match", status::WARNING);
    }

    if loaded.output.exists() {
        match Catalog::load(&loaded.output) {
            Ok(catalog) => println!(
                "  {} existing catalog: {} document(s), {} skipped",
                status::INFO,
                catalog.documents.len(),
                catalog.skipped.len()
            ),
            Err(e) => println!("  {} existing output is not a catalog: {e}", status::WARNING),
        }
    }
}
