//! TOML configuration for the command-line tool.
//!
//! ```toml
//! [limits]
//! max_files = 100
//! max_lines = 5000
//! enforce = true
//! expanded = false
//!
//! [patch]
//! size_limit = 102400
//!
//! [patch.max_bytes_for_extension]
//! ".lock" = 20480
//! ```

use crate::diff::{COLLAPSE_LIMIT, PatchLimits, SIZE_LIMIT};
use crate::options::{
    CollectionOptions, DEFAULT_MAX_FILES, DEFAULT_MAX_LINES, DEFAULT_SAFE_MAX_FILES,
    DEFAULT_SAFE_MAX_LINES,
};
use error_set::error_set;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

error_set! {
    /// Errors from loading a configuration file
    ConfigError := {
        /// The file could not be read
        #[display("Failed to read config {path}: {message}")]
        Read { path: String, message: String },
        /// The file is not valid configuration TOML
        #[display("Invalid config {path}: {message}")]
        Parse { path: String, message: String },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub patch: PatchConfig,
}

/// Collection-wide limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Defaults to a per-file budget times `max_files`
    #[serde(default)]
    pub max_bytes: Option<usize>,

    #[serde(default = "default_safe_max_files")]
    pub safe_max_files: usize,

    #[serde(default = "default_safe_max_lines")]
    pub safe_max_lines: usize,

    #[serde(default = "default_true")]
    pub enforce: bool,

    #[serde(default = "default_true")]
    pub expanded: bool,

    #[serde(default)]
    pub collapse_generated: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_lines: default_max_lines(),
            max_bytes: None,
            safe_max_files: default_safe_max_files(),
            safe_max_lines: default_safe_max_lines(),
            enforce: true,
            expanded: true,
            collapse_generated: false,
        }
    }
}

/// Per-diff size policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,

    #[serde(default = "default_collapse_limit")]
    pub collapse_limit: usize,

    #[serde(default)]
    pub max_bytes_for_extension: BTreeMap<String, usize>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            collapse_limit: default_collapse_limit(),
            max_bytes_for_extension: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_safe_max_files() -> usize {
    DEFAULT_SAFE_MAX_FILES
}

fn default_safe_max_lines() -> usize {
    DEFAULT_SAFE_MAX_LINES
}

fn default_size_limit() -> usize {
    SIZE_LIMIT
}

fn default_collapse_limit() -> usize {
    COLLAPSE_LIMIT
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.message().to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Collection options described by this configuration.
    pub fn to_options(&self) -> CollectionOptions {
        CollectionOptions {
            max_files: self.limits.max_files,
            max_lines: self.limits.max_lines,
            max_bytes: self.limits.max_bytes,
            safe_max_files: self.limits.safe_max_files,
            safe_max_lines: self.limits.safe_max_lines,
            limits: self.limits.enforce,
            expanded: self.limits.expanded,
            collapse_generated: self.limits.collapse_generated,
            patch: PatchLimits {
                size_limit: self.patch.size_limit,
                collapse_limit: self.patch.collapse_limit,
                max_bytes_for_extension: self.patch.max_bytes_for_extension.clone(),
            },
            ..CollectionOptions::default()
        }
    }
}
