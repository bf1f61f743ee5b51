//! Scan configuration.
//!
//! Settings come from an optional JSON file; command-line flags then
//! override individual fields.

use crate::plugins::task_cache::tree::DEFAULT_MAX_TREE_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use winreg::HiveType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// How records are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON array with every record.
    Json,
    /// One JSON object per line.
    #[default]
    Jsonl,
    /// One human-readable line per record.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Scan this key instead of the plugin's registered paths.
    pub key_path: Option<String>,
    /// Treat every input as this hive type instead of detecting it.
    pub registry_type: Option<HiveType>,
    /// Depth limit for the `Tree` walk.
    pub max_tree_depth: usize,
    pub output: OutputFormat,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            key_path: None,
            registry_type: None,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            output: OutputFormat::default(),
        }
    }
}

impl ScanConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
