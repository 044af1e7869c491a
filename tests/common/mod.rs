//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory holding index configurations and their
/// inputs, plus an isolated settings directory.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
    /// Settings directory passed as `INDEXHOST_CONFIG_DIR`
    pub config_dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            config_dir: TempDir::new().expect("Failed to create config directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    #[allow(dead_code)]
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    #[allow(dead_code)]
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    #[allow(dead_code)]
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write the global settings file
    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        std::fs::write(self.config_dir.path().join("config.toml"), content)
            .expect("Failed to write settings");
    }

    /// Create an index configuration `<name>.toml` over `docs/<name>`
    /// with `files` as its documents
    #[allow(dead_code)]
    pub fn create_index(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        for (file, content) in files {
            self.create_file(&format!("docs/{name}/{file}"), content);
        }
        if files.is_empty() {
            self.create_dir(&format!("docs/{name}"));
        }
        self.create_file(&format!("{name}.toml"), &index_config(name));
        self.path().join(format!("{name}.toml"))
    }

    /// Run indexhost in the project directory with isolated settings
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_indexhost"))
            .current_dir(self.path())
            .env("INDEXHOST_CONFIG_DIR", self.config_dir.path())
            .env_remove("INDEXHOST_MAX_WORKERS")
            .env_remove("RUST_LOG")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .expect("Failed to execute indexhost")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Index configuration over `docs/<name>` writing `<name>.catalog.json`
pub fn index_config(name: &str) -> String {
    format!(
        r#"
[index]
name = "{name}"

[input]
paths = ["docs/{name}"]
extensions = ["md", "txt"]
"#
    )
}

/// Stdout of a finished command
#[allow(dead_code)]
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Stderr of a finished command
#[allow(dead_code)]
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
