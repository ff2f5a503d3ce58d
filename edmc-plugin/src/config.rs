use crate::Error;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

/// Host configuration read by the plugin manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for plugin directories
    pub plugin_dir: PathBuf,
    /// Directories ending with this suffix are skipped as disabled
    pub disabled_suffix: String,
    /// Preferred provider plugin per capability
    pub providers: HashMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            disabled_suffix: ".disabled".to_string(),
            providers: HashMap::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from an optional TOML file, overridden by
    /// `EDMC_*` environment variables (`EDMC_PROVIDERS__SHIPYARD_URL=...`)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("EDMC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to load config: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a specific file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let toml = toml::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Plugin preferred for `capability`, if one is configured
    pub fn preferred_provider(&self, capability: &str) -> Option<&str> {
        self.providers.get(capability).map(String::as_str)
    }

    pub fn is_disabled(&self, dir_name: &str) -> bool {
        !self.disabled_suffix.is_empty() && dir_name.ends_with(&self.disabled_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.plugin_dir, PathBuf::from("plugins"));
        assert!(config.is_disabled("EDSM.disabled"));
        assert!(!config.is_disabled("EDSM"));
        assert_eq!(config.preferred_provider("shipyard_url"), None);
    }

    #[test]
    fn test_config_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = HostConfig::from_file(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.disabled_suffix, ".disabled");
    }

    #[test]
    fn test_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("edmc.toml");

        let mut config = HostConfig::default();
        config.plugin_dir = dir.path().join("plugins");
        config
            .providers
            .insert("shipyard_url".to_string(), "coriolis".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = HostConfig::from_file(&path).unwrap();
        assert_eq!(loaded.plugin_dir, dir.path().join("plugins"));
        assert_eq!(loaded.preferred_provider("shipyard_url"), Some("coriolis"));
    }

    #[test]
    fn test_config_partial_toml() {
        let config = HostConfig::from_toml("disabled_suffix = \".off\"\n").unwrap();
        assert_eq!(config.disabled_suffix, ".off");
        assert_eq!(config.plugin_dir, PathBuf::from("plugins"));
        assert!(HostConfig::from_toml("providers = 3").is_err());
    }
}
