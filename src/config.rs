//! Configuration for the cross-reference database.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `XREFDB_` and use double
//! underscores to separate nested levels:
//! - `XREFDB_DATABASE_PATH=/tmp/index` sets `database_path`
//! - `XREFDB_MAX_READERS=32` sets `max_readers`
//! - `XREFDB_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::PrefixMapping;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Directory of raw compiler records. Consumed by the ingestion
    /// driver, not the database core.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Directory the database lives in. The store creates a versioned
    /// subdirectory beneath it.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Reject all writes; skip recovery and creation.
    #[serde(default = "default_false")]
    pub readonly: bool,

    /// Initial size of the memory-mapped region, in bytes.
    #[serde(default = "default_initial_map_size")]
    pub initial_map_size: u64,

    /// Upper bound the map may grow to, in bytes.
    #[serde(default = "default_max_map_size")]
    pub max_map_size: u64,

    /// Maximum number of concurrent read transactions.
    #[serde(default = "default_max_readers")]
    pub max_readers: usize,

    /// Consider only units whose output files were registered via
    /// `Database::add_unit_out_file_paths`.
    #[serde(default = "default_false")]
    pub use_explicit_output_units: bool,

    /// Drive ingestion from raw-store change events; when false, the
    /// driver acts only on explicit polls.
    #[serde(default = "default_true")]
    pub listen_to_unit_events: bool,

    /// Block `Database::open` callers until the initial scan finishes.
    #[serde(default = "default_false")]
    pub wait_until_done_initializing: bool,

    /// Watch source files referenced by units for out-of-date detection.
    #[serde(default = "default_false")]
    pub enable_out_of_date_file_watching: bool,

    /// Path prefix remappings applied when ingesting paths.
    #[serde(default)]
    pub prefix_mappings: Vec<PrefixMapping>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level filter (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from(".xrefdb")
}
fn default_initial_map_size() -> u64 {
    64 * 1024 * 1024
}
fn default_max_map_size() -> u64 {
    64 * 1024 * 1024 * 1024
}
fn default_max_readers() -> usize {
    64
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: None,
            database_path: default_database_path(),
            readonly: false,
            initial_map_size: default_initial_map_size(),
            max_map_size: default_max_map_size(),
            max_readers: default_max_readers(),
            use_explicit_output_units: false,
            listen_to_unit_events: true,
            wait_until_done_initializing: false,
            enable_out_of_date_file_watching: false,
            prefix_mappings: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `xrefdb.toml` in the working directory, with
    /// environment overrides layered on top.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Path::new("xrefdb.toml"))
    }

    /// Load settings from a specific TOML file.
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("XREFDB_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database_path, PathBuf::from(".xrefdb"));
        assert!(!settings.readonly);
        assert_eq!(settings.initial_map_size, 64 * 1024 * 1024);
        assert_eq!(settings.max_readers, 64);
        assert!(settings.listen_to_unit_events);
        assert!(!settings.use_explicit_output_units);
        assert!(settings.prefix_mappings.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("xrefdb.toml");
        std::fs::write(
            &config_path,
            r#"
database_path = "/tmp/xref-test"
max_readers = 8
use_explicit_output_units = true

[[prefix_mappings]]
original = "/SRC_ROOT"
replacement = "/home/u/src"

[logging]
default = "debug"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.database_path, PathBuf::from("/tmp/xref-test"));
        assert_eq!(settings.max_readers, 8);
        assert!(settings.use_explicit_output_units);
        assert_eq!(settings.prefix_mappings.len(), 1);
        assert_eq!(settings.prefix_mappings[0].original, "/SRC_ROOT");
        assert_eq!(settings.logging.default, "debug");
        // untouched keys keep their defaults
        assert_eq!(settings.initial_map_size, 64 * 1024 * 1024);
    }
}
