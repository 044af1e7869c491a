//! Index configuration files
//!
//! An index configuration names the index, where its output goes and which
//! input files it covers. String values may reference environment variables
//! with `${VAR}`, and an unset variable fails the load; relative paths are
//! resolved against the directory of the configuration file.
//!
//! ```toml
//! [index]
//! name = "docs"
//! output = "docs.catalog.json"
//!
//! [input]
//! paths = ["notes"]
//! extensions = ["md", "txt"]
//! recursive = true
//! exclude = [".git"]
//!
//! [build]
//! fail_on_unreadable = false
//! ```

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::catalog::CatalogBuilder;
use crate::core::job::BuildJob;
use crate::error::ConfigLoadError;
use crate::infra::filesystem::{self, InputFilter};

/// A parsed index configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Index identity and output
    pub index: IndexSection,

    /// Input selection
    pub input: InputSection,

    /// Builder behaviour
    #[serde(default)]
    pub build: BuildSection,
}

/// `[index]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSection {
    /// Index name
    pub name: String,

    /// Output file; defaults to `<name>.catalog.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// `[input]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputSection {
    /// Files or directories to index
    pub paths: Vec<PathBuf>,

    /// Accepted extensions without the dot; empty accepts every file
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Descend into subdirectories
    #[serde(default = "default_recursive")]
    pub recursive: bool,

    /// Directory names to skip
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

/// `[build]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSection {
    /// Fail the job on the first unreadable input instead of skipping it
    #[serde(default)]
    pub fail_on_unreadable: bool,
}

impl IndexConfig {
    /// Create a configuration for `name` over `paths`
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            index: IndexSection {
                name: name.into(),
                output: None,
            },
            input: InputSection {
                paths,
                extensions: Vec::new(),
                recursive: true,
                exclude: Vec::new(),
            },
            build: BuildSection::default(),
        }
    }

    /// Load a configuration file with environment variable substitution
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = filesystem::read_file(path).map_err(|e| ConfigLoadError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let parse_error = |e: toml::de::Error| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let mut document: toml::Table = toml::from_str(&content).map_err(parse_error)?;
        VarExpander::new(path)?.expand_table(&mut document, "")?;
        let config: Self = toml::Value::Table(document).try_into().map_err(parse_error)?;

        config.validate(path)?;
        Ok(config)
    }

    /// Parse a configuration from TOML without substitution or validation
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize the configuration to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check field values; `path` is only used in error messages
    pub fn validate(&self, path: &Path) -> Result<(), ConfigLoadError> {
        let invalid = |message: &str| ConfigLoadError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.index.name.trim().is_empty() {
            return Err(invalid("index.name must not be empty"));
        }
        if self.input.paths.is_empty() {
            return Err(invalid("input.paths must list at least one file or directory"));
        }
        if let Some(ext) = self.input.extensions.iter().find(|e| e.starts_with('.') || e.is_empty()) {
            return Err(ConfigLoadError::Invalid {
                path: path.to_path_buf(),
                message: format!("input.extensions entry '{ext}' must be a bare extension like 'md'"),
            });
        }
        Ok(())
    }

    /// Output file, resolved against `base_dir`
    pub fn output_path(&self, base_dir: &Path) -> PathBuf {
        let output = self
            .index
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.{}", self.index.name, defaults::CATALOG_EXTENSION)));
        resolve(base_dir, &output)
    }

    /// Input roots, resolved against `base_dir`
    pub fn input_roots(&self, base_dir: &Path) -> Vec<PathBuf> {
        self.input
            .paths
            .iter()
            .map(|p| resolve(base_dir, p))
            .collect()
    }

    fn input_filter(&self) -> InputFilter {
        InputFilter {
            extensions: self.input.extensions.clone(),
            recursive: self.input.recursive,
            exclude: self.input.exclude.clone(),
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// A configuration loaded together with the files it covers
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path the configuration was read from
    pub path: PathBuf,
    /// Parsed configuration
    pub config: IndexConfig,
    /// Resolved output file
    pub output: PathBuf,
    /// Enumerated input files, sorted
    pub input_files: Vec<PathBuf>,
}

impl LoadedConfig {
    /// Load `path` and enumerate its inputs
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let config = IndexConfig::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let roots = config.input_roots(base_dir);
        if let Some(missing) = roots.iter().find(|root| !root.exists()) {
            return Err(ConfigLoadError::InputMissing {
                path: path.to_path_buf(),
                input: missing.clone(),
            });
        }

        let input_files = filesystem::collect_files(&roots, &config.input_filter()).map_err(
            |source| ConfigLoadError::Inputs {
                path: path.to_path_buf(),
                source,
            },
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            output: config.output_path(base_dir),
            config,
            input_files,
        })
    }

    /// Turn the configuration into a build job backed by the catalog builder
    pub fn into_job(self) -> BuildJob {
        let builder = CatalogBuilder::new(
            self.config.index.name.clone(),
            self.input_files.clone(),
            self.output,
        )
        .fail_on_unreadable(self.config.build.fail_on_unreadable);

        BuildJob::new(self.path, self.input_files, Box::new(builder))
    }
}

/// Load a configuration file into a build job
pub fn load_job(path: &Path) -> Result<BuildJob, ConfigLoadError> {
    LoadedConfig::load(path).map(LoadedConfig::into_job)
}

/// Expands `${VAR}` references in the string values of a configuration
///
/// Each value is addressed by its dotted key (`input.paths[1]`) so an unset
/// variable can be reported where it is used.
struct VarExpander<'a> {
    config: &'a Path,
    reference: Regex,
}

impl<'a> VarExpander<'a> {
    fn new(config: &'a Path) -> Result<Self, ConfigLoadError> {
        let reference = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
            ConfigLoadError::Parse {
                path: config.to_path_buf(),
                error: e.to_string(),
            }
        })?;
        Ok(Self { config, reference })
    }

    fn expand_table(&self, table: &mut toml::Table, prefix: &str) -> Result<(), ConfigLoadError> {
        for (name, value) in table.iter_mut() {
            let key = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            self.expand_value(value, &key)?;
        }
        Ok(())
    }

    fn expand_value(&self, value: &mut toml::Value, key: &str) -> Result<(), ConfigLoadError> {
        match value {
            toml::Value::String(text) => *text = self.expand_str(text, key)?,
            toml::Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.expand_value(item, &format!("{key}[{i}]"))?;
                }
            }
            toml::Value::Table(table) => self.expand_table(table, key)?,
            _ => {}
        }
        Ok(())
    }

    fn expand_str(&self, text: &str, key: &str) -> Result<String, ConfigLoadError> {
        let mut unset = None;
        let expanded = self.reference.replace_all(text, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                unset.get_or_insert_with(|| caps[1].to_string());
                String::new()
            })
        });

        match unset {
            Some(variable) => Err(ConfigLoadError::UnsetVariable {
                path: self.config.to_path_buf(),
                key: key.to_string(),
                variable,
            }),
            None => Ok(expanded.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[index]
name = "docs"

[input]
paths = ["notes"]
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = IndexConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.index.name, "docs");
        assert!(config.input.recursive);
        assert!(config.input.extensions.is_empty());
        assert!(!config.build.fail_on_unreadable);
        assert_eq!(
            config.output_path(Path::new("/base")),
            PathBuf::from("/base/docs.catalog.json")
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = IndexConfig::load(&temp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::NotFound { .. }));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "bad.toml", "[index\nname=");
        let err = IndexConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "partial.toml", "[index]\nname = \"x\"\n");
        let err = IndexConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn test_validation_errors() {
        let temp = TempDir::new().unwrap();

        let path = write(temp.path(), "empty-name.toml", "[index]\nname = \" \"\n[input]\npaths = [\"a\"]\n");
        assert!(matches!(
            IndexConfig::load(&path).unwrap_err(),
            ConfigLoadError::Invalid { .. }
        ));

        let path = write(temp.path(), "no-inputs.toml", "[index]\nname = \"x\"\n[input]\npaths = []\n");
        assert!(matches!(
            IndexConfig::load(&path).unwrap_err(),
            ConfigLoadError::Invalid { .. }
        ));

        let path = write(
            temp.path(),
            "dotted.toml",
            "[index]\nname = \"x\"\n[input]\npaths = [\"a\"]\nextensions = [\".md\"]\n",
        );
        let err = IndexConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(".md"));
    }

    #[test]
    fn test_env_substitution_in_paths() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("INDEXHOST_TEST_NOTES_DIR", "from-env");
        let path = write(
            temp.path(),
            "env.toml",
            "[index]\nname = \"env\"\n[input]\npaths = [\"${INDEXHOST_TEST_NOTES_DIR}/sub\"]\n",
        );
        let config = IndexConfig::load(&path).unwrap();
        std::env::remove_var("INDEXHOST_TEST_NOTES_DIR");
        assert_eq!(config.input.paths, vec![PathBuf::from("from-env/sub")]);
    }

    #[test]
    fn test_unset_variable_names_its_key() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            "unset.toml",
            "[index]\nname = \"x\"\n[input]\npaths = [\"a\", \"${INDEXHOST_TEST_SURELY_UNSET_VAR}/b\"]\n",
        );

        match IndexConfig::load(&path).unwrap_err() {
            ConfigLoadError::UnsetVariable { key, variable, .. } => {
                assert_eq!(key, "input.paths[1]");
                assert_eq!(variable, "INDEXHOST_TEST_SURELY_UNSET_VAR");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expansion_leaves_plain_values_alone() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            "plain.toml",
            "[index]\nname = \"costs $5 {x}\"\n[input]\npaths = [\"a\"]\nrecursive = false\n",
        );
        let config = IndexConfig::load(&path).unwrap();
        assert_eq!(config.index.name, "costs $5 {x}");
        assert!(!config.input.recursive);
    }

    #[test]
    fn test_loaded_config_enumerates_inputs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "notes/a.md", "alpha");
        write(temp.path(), "notes/b.txt", "beta");
        write(temp.path(), "notes/deep/c.md", "gamma");
        let path = write(
            temp.path(),
            "docs.toml",
            "[index]\nname = \"docs\"\noutput = \"out/docs.json\"\n[input]\npaths = [\"notes\"]\nextensions = [\"md\"]\n",
        );

        let loaded = LoadedConfig::load(&path).unwrap();
        assert_eq!(loaded.output, temp.path().join("out").join("docs.json"));
        assert_eq!(
            loaded.input_files,
            vec![
                temp.path().join("notes").join("a.md"),
                temp.path().join("notes").join("deep").join("c.md"),
            ]
        );

        let job = loaded.into_job();
        assert_eq!(job.id().path(), path.as_path());
        assert_eq!(job.input_files().len(), 2);
    }

    #[test]
    fn test_missing_input_root() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "docs.toml", MINIMAL);
        let err = load_job(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::InputMissing { .. }));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = IndexConfig::new("notes", vec![PathBuf::from("docs")]);
        config.input.extensions = vec!["md".into()];
        let toml = config.to_toml().unwrap();
        assert_eq!(IndexConfig::from_toml(&toml).unwrap(), config);
    }
}
