//! Filesystem operations
//!
//! Handles file and directory operations.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file, creating parent directories
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Filter applied while collecting input files
#[derive(Debug, Clone, Default)]
pub struct InputFilter {
    /// Accepted file extensions without the dot; empty accepts every file
    pub extensions: Vec<String>,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Directory names that are never entered
    pub exclude: Vec<String>,
}

impl InputFilter {
    fn accepts_file(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude.iter().any(|excluded| excluded == name)
    }
}

/// Collect the files under `roots` that pass `filter`
///
/// Roots that are files are taken as-is. The result is sorted and free of
/// duplicates.
pub fn collect_files(roots: &[PathBuf], filter: &InputFilter) -> Result<Vec<PathBuf>, FilesystemError> {
    let mut files = Vec::new();

    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }

        let max_depth = if filter.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !filter.is_excluded_dir(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry.map_err(|e| FilesystemError::Walk {
                path: root.clone(),
                error: e.to_string(),
            })?;
            if entry.file_type().is_file() && filter.accepts_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
