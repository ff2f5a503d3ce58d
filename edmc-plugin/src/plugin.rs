use crate::{
    event::Event,
    info::PluginInfo,
    manager::PluginManager,
    markers::{ClassMarkers, DeclarationError},
    provider::Provider,
    ui::Widget,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    any::Any,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};
use tracing::Span;

/// The contract every plugin satisfies
pub trait Plugin: Send + 'static {
    /// Finish loading and report the plugin's identity
    fn load(&mut self, path: &Path) -> anyhow::Result<PluginInfo>;

    /// Release resources before the plugin is dropped
    fn unload(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Refresh in place; the manager re-derives callbacks afterwards
    fn reload(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Build the plugin's row in the main window
    fn setup_ui(&mut self, _parent: &Widget) -> anyhow::Result<Option<Widget>> {
        Ok(None)
    }

    /// Build the plugin's preferences tab
    fn setup_preferences_ui(
        &mut self,
        _parent: &Widget,
        _commander: Option<&str>,
        _is_beta: bool,
    ) -> anyhow::Result<Option<Widget>> {
        Ok(None)
    }
}

/// A plugin type that can serve as a module's entry point.
///
/// Implemented by `#[edmc_plugin]`, or by hand.
pub trait PluginClass: Plugin + Sized {
    fn new(ctx: PluginContext) -> anyhow::Result<Self>;

    /// Hooks and providers declared by the class
    fn markers() -> Result<ClassMarkers<Self>, DeclarationError> {
        Ok(ClassMarkers::new())
    }
}

/// What a plugin instance is given at construction
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    path: PathBuf,
    logger: Span,
    manager: Weak<PluginManager>,
}

impl PluginContext {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, manager: Weak<PluginManager>) -> Self {
        let name = name.into();
        let logger = tracing::info_span!("plugin", plugin = %name);
        Self {
            name,
            path: path.into(),
            logger,
            manager,
        }
    }

    /// Directory name the plugin was loaded from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Span every log line of this plugin should be emitted in
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// The manager that loaded the plugin, while it is alive
    pub fn manager(&self) -> Option<Arc<PluginManager>> {
        self.manager.upgrade()
    }
}

type BoundHook = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// A hooked method bound to a live plugin instance
#[derive(Clone)]
pub struct Callback {
    method: Arc<str>,
    index: usize,
    call: BoundHook,
}

impl Callback {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Declaration position of the method within its class
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn invoke(&self, event: &Event) -> anyhow::Result<()> {
        (self.call)(event)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("method", &self.method)
            .field("index", &self.index)
            .finish()
    }
}

/// Event name to bound callbacks, each list in declaration order
pub type CallbackMap = HashMap<String, Vec<Callback>>;

/// Type-erased plugin instance held by the manager
pub(crate) trait PluginHandle: Send + Sync {
    fn class_name(&self) -> &str;
    fn load(&self, path: &Path) -> anyhow::Result<PluginInfo>;
    fn unload(&self) -> anyhow::Result<()>;
    fn reload(&self) -> anyhow::Result<()>;
    fn setup_ui(&self, parent: &Widget) -> anyhow::Result<Option<Widget>>;
    fn setup_preferences_ui(
        &self,
        parent: &Widget,
        commander: Option<&str>,
        is_beta: bool,
    ) -> anyhow::Result<Option<Widget>>;
    fn bind_callbacks(&self) -> CallbackMap;
    fn bind_providers(&self, plugin: &str) -> Vec<Provider>;
    fn as_any(&self) -> &dyn Any;
}

/// A plugin instance together with its class markers
pub(crate) struct ClassHandle<P: Plugin> {
    class_name: String,
    instance: Arc<Mutex<P>>,
    markers: Arc<ClassMarkers<P>>,
}

impl<P: Plugin> ClassHandle<P> {
    pub(crate) fn new(class_name: impl Into<String>, plugin: P, markers: Arc<ClassMarkers<P>>) -> Self {
        Self {
            class_name: class_name.into(),
            instance: Arc::new(Mutex::new(plugin)),
            markers,
        }
    }

    pub(crate) fn instance(&self) -> &Arc<Mutex<P>> {
        &self.instance
    }

    /// Run `f` on the instance, refusing re-entrant access
    fn with_instance<R>(&self, f: impl FnOnce(&mut P) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let mut guard = lock_instance(&self.instance, &self.class_name)?;
        f(&mut *guard)
    }
}

fn lock_instance<'a, P>(
    instance: &'a Mutex<P>,
    class_name: &str,
) -> anyhow::Result<parking_lot::MutexGuard<'a, P>> {
    instance
        .try_lock()
        .ok_or_else(|| anyhow::anyhow!("{} is already busy (re-entrant call into the plugin)", class_name))
}

impl<P: Plugin> PluginHandle for ClassHandle<P> {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn load(&self, path: &Path) -> anyhow::Result<PluginInfo> {
        self.with_instance(|plugin| plugin.load(path))
    }

    fn unload(&self) -> anyhow::Result<()> {
        self.with_instance(|plugin| plugin.unload())
    }

    fn reload(&self) -> anyhow::Result<()> {
        self.with_instance(|plugin| plugin.reload())
    }

    fn setup_ui(&self, parent: &Widget) -> anyhow::Result<Option<Widget>> {
        self.with_instance(|plugin| plugin.setup_ui(parent))
    }

    fn setup_preferences_ui(
        &self,
        parent: &Widget,
        commander: Option<&str>,
        is_beta: bool,
    ) -> anyhow::Result<Option<Widget>> {
        self.with_instance(|plugin| plugin.setup_preferences_ui(parent, commander, is_beta))
    }

    fn bind_callbacks(&self) -> CallbackMap {
        let mut callbacks = CallbackMap::new();
        for (index, hook) in self.markers.hooks().iter().enumerate() {
            let instance = Arc::clone(&self.instance);
            let call = Arc::clone(hook.call());
            let class_name = self.class_name.clone();
            let bound: BoundHook = Arc::new(move |event: &Event| {
                let mut guard = lock_instance(&instance, &class_name)?;
                call(&mut *guard, event)
            });
            let method: Arc<str> = Arc::from(hook.name());
            for event in hook.events() {
                callbacks.entry(event.clone()).or_default().push(Callback {
                    method: Arc::clone(&method),
                    index,
                    call: Arc::clone(&bound),
                });
            }
        }
        callbacks
    }

    fn bind_providers(&self, plugin: &str) -> Vec<Provider> {
        self.markers
            .providers()
            .iter()
            .map(|provider| {
                let instance = Arc::clone(&self.instance);
                let call = Arc::clone(provider.call());
                let class_name = self.class_name.clone();
                Provider::new(plugin, provider.capability(), provider.name(), move |args: &[Value]| {
                    let mut guard = lock_instance(&instance, &class_name)?;
                    call(&mut *guard, args)
                })
            })
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
