//! Document catalog builder
//!
//! The default [`IndexBuilder`]: records size, SHA-256 and token count of
//! every input file and writes the catalog as JSON. The catalog is written
//! to `<output>.partial` first and only renamed into place once the whole
//! run succeeded; `dispose` removes a leftover partial file.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::job::{IndexBuilder, JobContext};
use crate::error::JobError;
use crate::infra::filesystem;

/// One cataloged document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path of the document
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the content, hex encoded
    pub sha256: String,
    /// ASCII-whitespace-separated tokens in the content
    pub tokens: usize,
}

/// A document that could not be read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// The catalog written by [`CatalogBuilder`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    /// Index name
    pub name: String,
    /// Cataloged documents, in input order
    pub documents: Vec<CatalogEntry>,
    /// Inputs that were skipped
    #[serde(default)]
    pub skipped: Vec<SkippedDocument>,
}

impl Catalog {
    /// Load a catalog written by a previous run
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let content = filesystem::read_file(path).map_err(|e| JobError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| JobError::Failed(format!(
            "Invalid catalog '{}': {e}",
            path.display()
        )))
    }
}

/// Builds a [`Catalog`] from a list of input files
#[derive(Debug)]
pub struct CatalogBuilder {
    name: String,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    fail_on_unreadable: bool,
}

impl CatalogBuilder {
    /// Create a builder writing `output` from `inputs`
    pub fn new(name: impl Into<String>, inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            name: name.into(),
            inputs,
            output,
            fail_on_unreadable: false,
        }
    }

    /// Fail on the first unreadable input instead of skipping it
    #[must_use]
    pub fn fail_on_unreadable(mut self, fail: bool) -> Self {
        self.fail_on_unreadable = fail;
        self
    }

    /// Where the catalog is staged before it is moved into place
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("catalog"));
        name.push(".partial");
        self.output.with_file_name(name)
    }

    /// Hash and count a document while streaming it through a buffer
    fn catalog_document(path: &Path) -> Result<CatalogEntry, std::io::Error> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut tokens = TokenCounter::default();
        let mut size: u64 = 0;

        loop {
            let chunk = match reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                break;
            }
            hasher.update(chunk);
            tokens.feed(chunk);
            let len = chunk.len();
            size += len as u64;
            reader.consume(len);
        }

        Ok(CatalogEntry {
            path: path.to_path_buf(),
            size,
            sha256: hex::encode(hasher.finalize()),
            tokens: tokens.count,
        })
    }
}

/// Counts tokens across chunk boundaries
#[derive(Debug, Default)]
struct TokenCounter {
    in_token: bool,
    count: usize,
}

impl TokenCounter {
    fn feed(&mut self, chunk: &[u8]) {
        for byte in chunk {
            let space = byte.is_ascii_whitespace();
            if !space && !self.in_token {
                self.count += 1;
            }
            self.in_token = !space;
        }
    }
}

impl IndexBuilder for CatalogBuilder {
    fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
        tracing::info!(
            "Cataloging {} file(s) for index '{}'",
            self.inputs.len(),
            self.name
        );

        let mut catalog = Catalog {
            name: self.name.clone(),
            ..Catalog::default()
        };

        let total = self.inputs.len();
        if total == 0 {
            ctx.report_indeterminate();
        }

        for (done, input) in self.inputs.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::debug!("Index '{}' cancelled after {done} file(s)", self.name);
                return Err(JobError::Cancelled);
            }

            match Self::catalog_document(input) {
                Ok(entry) => catalog.documents.push(entry),
                Err(e) if self.fail_on_unreadable => {
                    return Err(JobError::Io {
                        path: input.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable input '{}': {e}", input.display());
                    catalog.skipped.push(SkippedDocument {
                        path: input.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            #[allow(clippy::cast_precision_loss)]
            ctx.report_progress((done + 1) as f64 / total as f64);
        }

        let json = serde_json::to_string_pretty(&catalog)
            .map_err(|e| JobError::Failed(format!("Failed to serialize catalog: {e}")))?;

        let partial = self.partial_path();
        filesystem::write_file(&partial, &json).map_err(|e| JobError::Io {
            path: partial.clone(),
            error: e.to_string(),
        })?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        std::fs::rename(&partial, &self.output).map_err(|e| JobError::Io {
            path: self.output.clone(),
            error: e.to_string(),
        })?;

        tracing::info!(
            "Wrote catalog '{}' ({} documents, {} skipped)",
            self.output.display(),
            catalog.documents.len(),
            catalog.skipped.len()
        );
        Ok(())
    }

    fn dispose(self: Box<Self>) -> Result<(), JobError> {
        let partial = self.partial_path();
        if partial.exists() {
            std::fs::remove_file(&partial).map_err(|e| JobError::Io {
                path: partial.clone(),
                error: e.to_string(),
            })?;
            tracing::debug!("Removed partial catalog '{}'", partial.display());
        }
        Ok(())
    }
}
