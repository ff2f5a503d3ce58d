use crate::{builtin, journal::JournalState};
use edmc_plugin::{DispatchReport, Event, HostConfig, PluginManager, ScanReport, names};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};

/// Plugin system integration for the EDMC host
pub struct PluginSystem {
    /// Plugin manager
    pub plugin_manager: Arc<PluginManager>,
    /// Journal context events are built from
    journal: Mutex<JournalState>,
    /// Whether plugin system is initialized
    initialized: RwLock<bool>,
}

impl PluginSystem {
    /// Create a new plugin system with the built-in plugins available
    pub fn new(config: HostConfig) -> Self {
        info!(
            "Initializing plugin system with directory: {}",
            config.plugin_dir.display()
        );
        Self {
            plugin_manager: PluginManager::new(builtin::catalog(), config),
            journal: Mutex::new(JournalState::new()),
            initialized: RwLock::new(false),
        }
    }

    /// Scan the plugin directory and load everything in it
    pub fn initialize(&self) -> Result<ScanReport, Error> {
        if *self.initialized.read() {
            warn!("Plugin system already initialized");
            return Ok(ScanReport::default());
        }

        info!("Starting plugin system initialization");
        let config = self.plugin_manager.config();
        std::fs::create_dir_all(&config.plugin_dir)?;
        builtin::install(config)?;

        let report = self.plugin_manager.scan_and_load()?;
        *self.initialized.write() = true;

        info!("Plugin system initialized successfully");
        info!(
            "Loaded {} plugins ({} disabled, {} failed)",
            report.loaded.len(),
            report.disabled.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Fire `core.shutdown` and unload every plugin
    pub fn shutdown(&self) {
        if !*self.initialized.read() {
            warn!("Plugin system not initialized");
            return;
        }

        info!("Shutting down plugin system");
        self.plugin_manager.fire_event(&Event::new(names::SHUTDOWN));
        let unloaded = self.plugin_manager.unload_all();
        *self.initialized.write() = false;

        info!("Plugin system shutdown complete ({} plugins unloaded)", unloaded);
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.read()
    }

    /// Feed one journal line through the tracker and dispatch the events
    /// it produces
    pub fn handle_journal_line(&self, line: &str) -> Result<Vec<DispatchReport>, Error> {
        let events = self.journal.lock().process_line(line)?;
        Ok(events
            .iter()
            .map(|event| self.plugin_manager.fire_event(event))
            .collect())
    }

    /// Current journal context
    pub fn journal(&self) -> JournalState {
        self.journal.lock().clone()
    }

    /// Get plugin system status
    pub fn status(&self) -> PluginSystemStatus {
        let stats = self.plugin_manager.stats();
        PluginSystemStatus {
            initialized: self.is_initialized(),
            total_plugins: stats.total_plugins,
            legacy_plugins: stats.legacy_plugins,
            registered_callbacks: stats.registered_callbacks,
            active_providers: stats.active_providers,
        }
    }
}

/// Plugin system status
#[derive(Debug, Clone)]
pub struct PluginSystemStatus {
    pub initialized: bool,
    pub total_plugins: usize,
    pub legacy_plugins: usize,
    pub registered_callbacks: usize,
    pub active_providers: usize,
}

/// Error type for plugin system
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Plugin system error: {0}")]
    PluginSystem(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid journal line: {0}")]
    Journal(#[from] serde_json::Error),
}

impl From<edmc_plugin::Error> for Error {
    fn from(e: edmc_plugin::Error) -> Self {
        Error::PluginSystem(format!("{}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn system() -> (TempDir, PluginSystem) {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfig {
            plugin_dir: temp_dir.path().join("plugins"),
            ..HostConfig::default()
        };
        (temp_dir, PluginSystem::new(config))
    }

    #[test]
    fn test_plugin_system_lifecycle() {
        let (_temp_dir, system) = system();
        assert!(!system.status().initialized);

        let report = system.initialize().unwrap();
        assert_eq!(report.loaded.len(), 2);
        let status = system.status();
        assert!(status.initialized);
        assert_eq!(status.total_plugins, 2);
        assert_eq!(status.legacy_plugins, 1);

        // A second initialize is a no-op
        assert!(system.initialize().unwrap().loaded.is_empty());

        system.shutdown();
        assert!(!system.is_initialized());
        assert_eq!(system.status().total_plugins, 0);
    }

    #[test]
    fn test_journal_dispatch() {
        let (_temp_dir, system) = system();
        system.initialize().unwrap();

        let reports = system
            .handle_journal_line(r#"{"event":"Commander","Name":"Jameson"}"#)
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(DispatchReport::is_clean));
        assert_eq!(system.journal().commander(), Some("Jameson"));

        assert!(matches!(system.handle_journal_line("{"), Err(Error::Journal(_))));
    }
}
