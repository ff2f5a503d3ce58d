//! EDMC plugin engine
//!
//! Discovers plugin directories, loads the module each one resolves to,
//! registers the callbacks and capability providers its plugin class
//! declares, and dispatches events to them with per-plugin failure isolation.
//! Plugins written against the old free-function API are driven through the
//! same pipeline by a compatibility adapter.

pub mod config;
pub mod event;
pub mod info;
pub mod isolation;
pub mod legacy;
pub mod manager;
pub mod manifest;
pub mod markers;
pub mod module;
pub mod plugin;
pub mod provider;
pub mod ui;

// Re-exports
pub use config::HostConfig;
pub use event::{Event, EventData, EventMap, EventPayload, JournalEntry, capabilities, names};
pub use info::{IntoSemanticVersion, PluginInfo, UNKNOWN_VERSION, coerce_version, unknown_version};
pub use isolation::{ExitRequest, Failure, isolate, request_exit};
pub use legacy::{LegacyFunction, LegacyPlugin, LegacyValue};
pub use manager::{
    CallbackFailure, DispatchReport, LoadedPlugin, PluginManager, PluginManagerStats, ScanReport,
};
pub use manifest::PluginManifest;
pub use markers::{ClassMarkers, DeclarationError, HookMethod, ProviderMethod, WILDCARD};
pub use module::{EntryPoint, ModuleBuilder, ModuleCatalog, ModuleItem, ModuleRef, PluginModule};
pub use plugin::{Plugin, PluginClass, PluginContext};
pub use provider::{Provider, ProviderRegistry};
pub use ui::{Container, Widget};

pub use edmc_plugin_macros::{edmc_plugin, hook, provider};

// Used by code generated from the attribute macros.
pub use anyhow;
pub use semver::Version;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the plugin engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Plugin does not exist: {0}")]
    PluginDoesNotExist(String),
    #[error("Plugin has no plugin class: {0}")]
    PluginHasNoPluginClass(String),
    #[error("Plugin module declares more than one plugin class: {0}")]
    AmbiguousPluginClass(String),
    #[error("Plugin already loaded: {0}")]
    PluginAlreadyLoaded(String),
    #[error("Legacy plugin needs migrating: {0}")]
    LegacyPluginNeedsMigrating(String),
    #[error("Legacy plugin has no plugin_start3: {0}")]
    LegacyPluginHasNoStart3(String),
    #[error("Could not load plugin: {0}")]
    PluginLoading(String),
    #[error("Capability {capability} is already provided by {active}")]
    ProviderConflict { capability: String, active: String },
    #[error("Plugin {plugin} does not provide capability {capability}")]
    ProviderNotOffered { capability: String, plugin: String },
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Plugin not found: {0}")]
    NotFound(String),
    #[error("Invalid version: {0}")]
    Version(String),
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
