use crate::{
    Error, Result,
    config::HostConfig,
    event::{Event, names::WILDCARD},
    info::PluginInfo,
    isolation::{Failure, isolate},
    legacy::LegacyPlugin,
    module::{ModuleCatalog, PluginModule},
    plugin::{Callback, CallbackMap, ClassHandle, Plugin, PluginContext, PluginHandle},
    provider::{Provider, ProviderRegistry},
    ui::Widget,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};
use tracing::{debug, error, info, warn};

/// A successfully loaded plugin
pub struct LoadedPlugin {
    /// Identity returned by the plugin's `load()`
    info: PluginInfo,
    /// Directory the plugin was loaded from
    path: PathBuf,
    /// The executed module
    module: Arc<PluginModule>,
    /// The live plugin instance
    handle: Arc<dyn PluginHandle>,
    /// Event name to bound callbacks
    callbacks: CallbackMap,
    /// Loaded through the legacy adapter
    legacy: bool,
}

impl LoadedPlugin {
    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn module(&self) -> &PluginModule {
        &self.module
    }

    pub fn class_name(&self) -> &str {
        self.handle.class_name()
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Event names this plugin has callbacks for
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    /// Callbacks that should see an event named `event`: those registered
    /// under the name and under the wildcard, in declaration order, each
    /// method at most once
    pub fn callbacks_for(&self, event: &str) -> Vec<Callback> {
        let mut callbacks: Vec<Callback> = self
            .callbacks
            .get(event)
            .into_iter()
            .chain(self.callbacks.get(WILDCARD).filter(|_| event != WILDCARD))
            .flatten()
            .cloned()
            .collect();
        callbacks.sort_by_key(Callback::index);
        callbacks.dedup_by_key(|c| c.index());
        callbacks
    }

    /// Number of (event, method) registrations
    pub fn callback_count(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    /// Borrow the plugin instance as its concrete type.
    ///
    /// Returns `None` if the plugin is not a `P`, or if it is busy running
    /// plugin code.
    pub fn with_instance<P: Plugin, R>(&self, f: impl FnOnce(&P) -> R) -> Option<R> {
        let handle = self.handle.as_any().downcast_ref::<ClassHandle<P>>()?;
        let guard = handle.instance().try_lock()?;
        Some(f(&guard))
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("info", &self.info)
            .field("path", &self.path)
            .field("class_name", &self.handle.class_name())
            .field("legacy", &self.legacy)
            .finish()
    }
}

/// Outcome of scanning the plugin directory
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Names of plugins that loaded
    pub loaded: Vec<String>,
    /// Directories skipped because of the disabled suffix
    pub disabled: Vec<String>,
    /// Hidden directories and directories that are not plugins
    pub skipped: Vec<String>,
    /// Directory name and error of plugins that failed to load
    pub failed: Vec<(String, String)>,
}

/// A callback that failed during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub plugin: String,
    pub event: String,
    pub method: String,
    pub message: String,
}

/// Outcome of firing one event
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Callbacks that ran to completion
    pub delivered: usize,
    pub failures: Vec<CallbackFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Plugin manager statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManagerStats {
    pub total_plugins: usize,
    pub legacy_plugins: usize,
    pub registered_callbacks: usize,
    pub active_providers: usize,
}

/// Plugin manager responsible for loading, unloading and dispatching to plugins
pub struct PluginManager {
    /// Loaded plugins in load order
    plugins: RwLock<Vec<Arc<LoadedPlugin>>>,
    /// Capability offers and active providers
    providers: RwLock<ProviderRegistry>,
    /// Module key to module factory
    catalog: ModuleCatalog,
    config: HostConfig,
    /// Handed to plugins through their context
    weak_self: Weak<PluginManager>,
}

impl PluginManager {
    /// Create a new plugin manager
    pub fn new(catalog: ModuleCatalog, config: HostConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            plugins: RwLock::new(Vec::new()),
            providers: RwLock::new(ProviderRegistry::new()),
            catalog,
            config,
            weak_self: weak_self.clone(),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Immediate subdirectories of `root`, sorted by name
    pub fn find_potential_plugins(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(root.as_ref())? {
            let path = entry?.path();
            if path.is_dir() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Load the plugin in directory `path`
    pub fn load_plugin(&self, path: impl AsRef<Path>) -> Result<Arc<LoadedPlugin>> {
        let path = path.as_ref();
        let module_ref = self.catalog.resolve(path)?;
        debug!("Loading plugin from {} (module {})", path.display(), module_ref.key());

        let module = module_ref
            .execute()
            .map_err(|failure| Error::PluginLoading(format!("{}: {}", path.display(), failure)))?;
        let module = Arc::new(module);

        let ctx = PluginContext::new(dir_name(path), path, self.weak_self.clone());
        let (handle, legacy) = match module.entry_points().as_slice() {
            [entry] => {
                let handle = isolate(|| entry.instantiate(ctx)).map_err(|failure| {
                    Error::PluginLoading(format!("{}: {}", entry.class_name(), failure))
                })?;
                (handle, false)
            }
            [] => (legacy_handle(&module, ctx, path)?, true),
            many => {
                let classes: Vec<&str> = many.iter().map(|entry| entry.class_name()).collect();
                return Err(Error::AmbiguousPluginClass(format!(
                    "{}: {}",
                    path.display(),
                    classes.join(", ")
                )));
            }
        };

        let callbacks = handle.bind_callbacks();

        let info = isolate(|| handle.load(path)).map_err(|failure| {
            Error::PluginLoading(format!("{}.load(): {}", handle.class_name(), failure))
        })?;
        if info.name().is_empty() {
            return Err(Error::PluginLoading(format!(
                "{}.load() did not return a valid PluginInfo",
                handle.class_name()
            )));
        }

        let plugin = Arc::new(LoadedPlugin {
            info,
            path: path.to_path_buf(),
            module,
            handle,
            callbacks,
            legacy,
        });

        {
            let mut plugins = self.plugins.write();
            if !plugins.iter().any(|p| p.name() == plugin.name()) {
                plugins.push(Arc::clone(&plugin));
            } else {
                drop(plugins);
                if let Err(failure) = isolate(|| plugin.handle.unload()) {
                    warn!(
                        "Failed to unload duplicate instance of plugin {}: {}",
                        plugin.name(),
                        failure
                    );
                }
                return Err(Error::PluginAlreadyLoaded(plugin.name().to_string()));
            }
        }

        self.offer_providers(plugin.handle.bind_providers(plugin.name()));

        info!("Plugin loaded successfully: {} ({})", plugin.info(), path.display());
        Ok(plugin)
    }

    /// Load every path, logging failures. One slot per path, in order.
    pub fn load_plugins<I, P>(&self, paths: I) -> Vec<Option<Arc<LoadedPlugin>>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                match self.load_plugin(path) {
                    Ok(plugin) => Some(plugin),
                    Err(e) => {
                        error!("Failed to load plugin {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Scan the configured plugin directory and load everything in it
    pub fn scan_and_load(&self) -> Result<ScanReport> {
        let root = &self.config.plugin_dir;
        info!("Scanning plugin directory: {}", root.display());

        let mut report = ScanReport::default();
        if !root.is_dir() {
            warn!("Plugin directory does not exist: {}", root.display());
            return Ok(report);
        }

        for path in self.find_potential_plugins(root)? {
            let name = dir_name(&path);
            if name.starts_with('.') || name.starts_with('_') {
                debug!("Skipping hidden directory: {}", name);
                report.skipped.push(name);
                continue;
            }
            if self.config.is_disabled(&name) {
                info!("Plugin disabled: {}", name);
                report.disabled.push(name);
                continue;
            }

            match self.load_plugin(&path) {
                Ok(plugin) => report.loaded.push(plugin.name().to_string()),
                Err(Error::PluginHasNoPluginClass(_) | Error::PluginDoesNotExist(_)) => {
                    debug!("Not a plugin: {}", path.display());
                    report.skipped.push(name);
                }
                Err(e) => {
                    error!("Failed to load plugin {}: {}", path.display(), e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Unload a plugin by name. Returns whether it was loaded.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let Some(plugin) = self.get_plugin(name) else {
            return false;
        };

        match isolate(|| plugin.handle.unload()) {
            Ok(()) => {}
            Err(Failure::Exit(code)) => error!(
                "Plugin {} attempted to exit the host process with code {} while unloading; ignored",
                name, code
            ),
            Err(Failure::Error(e)) if matches!(e.downcast_ref::<Error>(), Some(Error::NotSupported(_))) => {
                debug!("Plugin {} does not support unloading: {}", name, e)
            }
            Err(failure) => error!("Failed to unload plugin {}: {}", name, failure),
        }

        self.plugins.write().retain(|p| !Arc::ptr_eq(p, &plugin));
        let vacated = self.providers.write().remove_plugin(name);
        self.promote_providers(&vacated);

        info!("Plugin unloaded: {}", name);
        true
    }

    /// Unload every plugin, most recently loaded first
    pub fn unload_all(&self) -> usize {
        let names: Vec<String> = self
            .plugins
            .read()
            .iter()
            .rev()
            .map(|p| p.name().to_string())
            .collect();
        names.iter().filter(|name| self.unload_plugin(name)).count()
    }

    /// Reload a plugin in place and re-derive its callbacks and providers
    pub fn reload_plugin(&self, name: &str) -> Result<Arc<LoadedPlugin>> {
        let plugin = self
            .get_plugin(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        isolate(|| plugin.handle.reload()).map_err(|failure| match failure {
            Failure::Error(e) => e
                .downcast::<Error>()
                .unwrap_or_else(|e| Error::PluginLoading(format!("{}.reload(): {:#}", name, e))),
            other => Error::PluginLoading(format!("{}.reload(): {}", name, other)),
        })?;

        let reloaded = Arc::new(LoadedPlugin {
            info: plugin.info.clone(),
            path: plugin.path.clone(),
            module: Arc::clone(&plugin.module),
            handle: Arc::clone(&plugin.handle),
            callbacks: plugin.handle.bind_callbacks(),
            legacy: plugin.legacy,
        });

        {
            let mut plugins = self.plugins.write();
            let slot = plugins
                .iter_mut()
                .find(|p| Arc::ptr_eq(p, &plugin))
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            *slot = Arc::clone(&reloaded);
        }
        let vacated = self.providers.write().remove_plugin(name);
        self.offer_providers(reloaded.handle.bind_providers(name));
        self.promote_providers(&vacated);

        info!("Plugin reloaded: {}", name);
        Ok(reloaded)
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.plugins.read().iter().any(|p| p.name() == name)
    }

    /// Get a plugin by name
    pub fn get_plugin(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.read().iter().find(|p| p.name() == name).cloned()
    }

    /// All loaded plugins in load order
    pub fn plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.plugins.read().clone()
    }

    fn is_current(&self, plugin: &Arc<LoadedPlugin>) -> bool {
        self.plugins.read().iter().any(|p| Arc::ptr_eq(p, plugin))
    }

    /// Deliver `event` to every plugin hooked onto it or onto the wildcard.
    ///
    /// Plugins are visited in load order. A failing callback is logged and
    /// recorded in the report; dispatch carries on with the next one.
    pub fn fire_event(&self, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();

        for plugin in self.plugins() {
            for callback in plugin.callbacks_for(event.name()) {
                if !self.is_current(&plugin) {
                    debug!("Plugin {} was unloaded during dispatch of {}", plugin.name(), event.name());
                    break;
                }

                match isolate(|| callback.invoke(event)) {
                    Ok(()) => report.delivered += 1,
                    Err(failure) => {
                        error!(
                            "Failed to dispatch {} to {}.{}: {}",
                            event.name(),
                            plugin.name(),
                            callback.method(),
                            failure
                        );
                        report.failures.push(CallbackFailure {
                            plugin: plugin.name().to_string(),
                            event: event.name().to_string(),
                            method: callback.method().to_string(),
                            message: failure.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    /// Give each capability left without an active provider a new one: the
    /// configured preference if it is on offer, otherwise the earliest offer.
    fn promote_providers(&self, capabilities: &[String]) {
        let mut registry = self.providers.write();
        for capability in capabilities {
            if registry.active_plugin(capability).is_some() {
                continue;
            }
            let candidates = registry.candidates(capability);
            let next = match self.config.preferred_provider(capability) {
                Some(preferred) if candidates.contains(&preferred) => Some(preferred.to_string()),
                _ => candidates.first().map(|plugin| plugin.to_string()),
            };
            let Some(next) = next else {
                debug!("No provider left for {}", capability);
                continue;
            };
            match registry.set_active(capability, &next) {
                Ok(()) => info!("Provider {} takes over {}", next, capability),
                Err(e) => warn!("Could not activate provider {} for {}: {}", next, capability, e),
            }
        }
    }

    fn offer_providers(&self, providers: Vec<Provider>) {
        let mut registry = self.providers.write();
        for provider in providers {
            let capability = provider.capability().to_string();
            let plugin = provider.plugin().to_string();
            registry.offer(provider);

            let preferred = self.config.preferred_provider(&capability) == Some(plugin.as_str());
            match registry.active_plugin(&capability).map(str::to_string) {
                None => {}
                Some(active) if preferred && active != plugin => {
                    info!("Preferred provider {} replaces {} for {}", plugin, active, capability);
                    registry.clear_active(&capability);
                }
                Some(active) => {
                    if active != plugin {
                        warn!(
                            "Capability {} is already provided by {}; {} is available as an alternative",
                            capability, active, plugin
                        );
                    }
                    continue;
                }
            }

            if let Err(e) = registry.set_active(&capability, &plugin) {
                warn!("Could not activate provider {} for {}: {}", plugin, capability, e);
            }
        }
    }

    /// The active provider for `capability`
    pub fn resolve_provider(&self, capability: &str) -> Option<Provider> {
        self.providers.read().resolve(capability).cloned()
    }

    /// Call the active provider for `capability`.
    ///
    /// `None` if nothing provides the capability, the provider has nothing
    /// to offer, or it failed.
    pub fn call_provider(&self, capability: &str, args: &[Value]) -> Option<String> {
        let provider = self.resolve_provider(capability)?;
        match isolate(|| provider.call(args)) {
            Ok(url) => url,
            Err(failure) => {
                error!(
                    "Provider {}.{} for {} failed: {}",
                    provider.plugin(),
                    provider.method(),
                    capability,
                    failure
                );
                None
            }
        }
    }

    /// Make `plugin` the active provider for `capability`
    pub fn set_active_provider(&self, capability: &str, plugin: &str) -> Result<()> {
        self.providers.write().set_active(capability, plugin)?;
        info!("Active provider for {}: {}", capability, plugin);
        Ok(())
    }

    pub fn clear_active_provider(&self, capability: &str) -> Option<String> {
        self.providers.write().clear_active(capability)
    }

    /// Plugins offering `capability`, in load order
    pub fn provider_candidates(&self, capability: &str) -> Vec<String> {
        self.providers
            .read()
            .candidates(capability)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Build every plugin's main window row
    pub fn plugin_ui(&self, parent: &Widget) -> Vec<(String, Widget)> {
        self.collect_ui("setup_ui", |handle| handle.setup_ui(parent))
    }

    /// Build every plugin's preferences tab
    pub fn plugin_preferences_ui(
        &self,
        parent: &Widget,
        commander: Option<&str>,
        is_beta: bool,
    ) -> Vec<(String, Widget)> {
        self.collect_ui("setup_preferences_ui", |handle| {
            handle.setup_preferences_ui(parent, commander, is_beta)
        })
    }

    fn collect_ui(
        &self,
        what: &str,
        build: impl Fn(&dyn PluginHandle) -> anyhow::Result<Option<Widget>>,
    ) -> Vec<(String, Widget)> {
        let mut widgets = Vec::new();
        for plugin in self.plugins() {
            match isolate(|| build(plugin.handle.as_ref())) {
                Ok(Some(widget)) => widgets.push((plugin.name().to_string(), widget)),
                Ok(None) => {}
                Err(failure) => error!("Failed to run {}.{}: {}", plugin.name(), what, failure),
            }
        }
        widgets
    }

    /// Get plugin manager statistics
    pub fn stats(&self) -> PluginManagerStats {
        let plugins = self.plugins.read();
        PluginManagerStats {
            total_plugins: plugins.len(),
            legacy_plugins: plugins.iter().filter(|p| p.legacy).count(),
            registered_callbacks: plugins.iter().map(|p| p.callback_count()).sum(),
            active_providers: self.providers.read().active_count(),
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Wrap a module without a plugin class through the legacy adapter
fn legacy_handle(module: &Arc<PluginModule>, ctx: PluginContext, path: &Path) -> Result<Arc<dyn PluginHandle>> {
    let plugin = LegacyPlugin::new(Arc::clone(module), ctx).map_err(|e| match e {
        Error::LegacyPluginHasNoStart3(_) => Error::PluginHasNoPluginClass(path.display().to_string()),
        other => other,
    })?;
    let markers = LegacyPlugin::markers(module)
        .map_err(|e| Error::PluginLoading(format!("{}: {}", path.display(), e)))?;
    Ok(Arc::new(ClassHandle::new("LegacyPlugin", plugin, Arc::new(markers))))
}
