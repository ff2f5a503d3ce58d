use crate::Error;
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr};

/// Name of the optional manifest inside a plugin directory
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Optional `plugin.toml` naming the module a plugin directory resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Module key in the catalog; defaults to the directory name
    pub module: Option<String>,
    /// Human readable description (optional)
    pub description: Option<String>,
}

impl PluginManifest {
    /// Load a manifest from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Read the manifest of a plugin directory, if it has one
    pub fn find_in(dir: impl AsRef<Path>) -> Result<Option<Self>, Error> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Self::from_file(path).map(Some)
    }

    /// Serialize the manifest back to TOML
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(self)
            .map_err(|e| Error::InvalidManifest(format!("Failed to serialize manifest: {}", e)))
    }
}

impl FromStr for PluginManifest {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self, Error> {
        let manifest: Self = toml::from_str(content)
            .map_err(|e| Error::InvalidManifest(format!("Failed to parse manifest: {}", e)))?;

        if manifest.module.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(Error::InvalidManifest("Module name cannot be empty".to_string()));
        }

        Ok(manifest)
    }
}
