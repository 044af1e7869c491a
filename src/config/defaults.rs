//! Default configuration values

/// Seconds a builder's dispose may take before it is reported as timed out
pub const DISPOSE_GRACE_SECS: u64 = 10;

/// Extension appended to an index name for its default output file
pub const CATALOG_EXTENSION: &str = "catalog.json";

/// Environment variable holding the default `--max-workers` value
pub const ENV_MAX_WORKERS: &str = "INDEXHOST_MAX_WORKERS";

/// Redraw interval of the run progress display (in milliseconds)
pub const PROGRESS_TICK_MS: u64 = 100;
