// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor configuration, stored as RON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current configuration file format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Settings applied by an [`Editor`](crate::Editor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// File format version
    pub version: u32,
    /// Registry category of template-backed node types
    pub subgraph_category: String,
    /// Name given to templates captured from a graph
    pub default_template_name: String,
    /// Emit a `warn` event for every problem found while loading
    pub log_load_warnings: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            subgraph_category: "Subgraphs".to_string(),
            default_template_name: "Subgraph".to_string(),
            log_load_warnings: true,
        }
    }
}

impl EditorConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EditorConfig = ron::from_str(&content)?;

        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }

        Ok(config)
    }

    /// Write the configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let pretty = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        let content = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
