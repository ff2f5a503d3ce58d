//! Plugin code units.
//!
//! A plugin directory resolves, through the [`ModuleCatalog`], to a factory
//! producing a [`PluginModule`]: the set of items (plugin classes, legacy
//! functions and module values) the plugin's code defines. Executing the
//! factory is the equivalent of importing the plugin, and like any other
//! plugin code it runs behind the isolation boundary.

use crate::{
    Error,
    isolation::{Failure, isolate},
    legacy::LegacyFunction,
    manifest::PluginManifest,
    markers::DeclarationError,
    plugin::{ClassHandle, PluginClass, PluginContext, PluginHandle},
};
use serde_json::Value;
use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

type Constructor = Arc<dyn Fn(PluginContext) -> anyhow::Result<Arc<dyn PluginHandle>> + Send + Sync>;

/// A type-erased constructor for a marked plugin class
#[derive(Clone)]
pub struct EntryPoint {
    class_name: String,
    type_id: TypeId,
    construct: Constructor,
}

impl EntryPoint {
    /// Build the entry point for `P`, collecting its markers once
    pub fn of<P: PluginClass>() -> Result<Self, DeclarationError> {
        let markers = Arc::new(P::markers()?);
        let class_name = short_type_name::<P>().to_string();
        let name = class_name.clone();
        Ok(Self {
            class_name,
            type_id: TypeId::of::<P>(),
            construct: Arc::new(move |ctx: PluginContext| {
                let plugin = P::new(ctx)?;
                let handle: Arc<dyn PluginHandle> =
                    Arc::new(ClassHandle::new(name.clone(), plugin, Arc::clone(&markers)));
                Ok(handle)
            }),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub(crate) fn instantiate(&self, ctx: PluginContext) -> anyhow::Result<Arc<dyn PluginHandle>> {
        (self.construct)(ctx)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint").field("class_name", &self.class_name).finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Something a plugin module defines at its top level
#[derive(Debug, Clone)]
pub enum ModuleItem {
    Class(EntryPoint),
    Function(LegacyFunction),
    Value(Value),
}

/// The executed form of a plugin's code
#[derive(Debug, Clone)]
pub struct PluginModule {
    name: String,
    doc: Option<String>,
    items: Vec<(String, ModuleItem)>,
}

impl PluginModule {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            module: PluginModule {
                name: name.into(),
                doc: None,
                items: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module documentation string
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Items in definition order
    pub fn items(&self) -> &[(String, ModuleItem)] {
        &self.items
    }

    /// Marked plugin classes in definition order
    pub fn entry_points(&self) -> Vec<&EntryPoint> {
        self.items
            .iter()
            .filter_map(|(_, item)| match item {
                ModuleItem::Class(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn function(&self, name: &str) -> Option<&LegacyFunction> {
        self.item(name).and_then(|item| match item {
            ModuleItem::Function(function) => Some(function),
            _ => None,
        })
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.item(name).and_then(|item| match item {
            ModuleItem::Value(value) => Some(value),
            _ => None,
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.item(name).is_some()
    }

    fn item(&self, name: &str) -> Option<&ModuleItem> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, item)| item)
    }
}

/// Builder for [`PluginModule`]
pub struct ModuleBuilder {
    module: PluginModule,
}

impl ModuleBuilder {
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.module.doc = Some(doc.into());
        self
    }

    /// Define a marked plugin class.
    ///
    /// The class's markers are collected here, so declaration errors surface
    /// while the module executes.
    pub fn plugin_class<P: PluginClass>(mut self) -> Result<Self, DeclarationError> {
        let type_id = TypeId::of::<P>();
        let duplicate = self.module.items.iter().any(|(_, item)| {
            matches!(item, ModuleItem::Class(entry) if entry.type_id == type_id)
        });
        if duplicate {
            return Err(DeclarationError::AlreadyPluginClass {
                class: short_type_name::<P>().to_string(),
            });
        }
        let entry = EntryPoint::of::<P>()?;
        self.module
            .items
            .push((entry.class_name().to_string(), ModuleItem::Class(entry)));
        Ok(self)
    }

    /// Define a top-level function; redefining a name replaces it
    pub fn function(self, name: impl Into<String>, function: LegacyFunction) -> Self {
        self.define(name.into(), ModuleItem::Function(function))
    }

    /// Define a module value such as `__version__`
    pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.define(name.into(), ModuleItem::Value(value.into()))
    }

    fn define(mut self, name: String, item: ModuleItem) -> Self {
        match self.module.items.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = item,
            None => self.module.items.push((name, item)),
        }
        self
    }

    pub fn build(self) -> PluginModule {
        self.module
    }
}

/// Executes a plugin's code, producing its module
pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<PluginModule> + Send + Sync>;

/// Module key to module factory.
///
/// A plugin directory resolves to the key named by its `plugin.toml`, or to
/// its directory name.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `key`, replacing any previous one
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<PluginModule> + Send + Sync + 'static,
    {
        let key = key.into();
        debug!("Registered plugin module: {}", key);
        self.factories.insert(key, Arc::new(factory));
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<PluginModule> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Resolve a plugin directory to its module
    pub fn resolve(&self, path: &Path) -> Result<ModuleRef, Error> {
        if !path.is_dir() {
            return Err(Error::PluginDoesNotExist(path.display().to_string()));
        }

        let manifest = PluginManifest::find_in(path)
            .map_err(|e| Error::PluginDoesNotExist(format!("{}: {}", path.display(), e)))?;

        let key = match manifest.as_ref().and_then(|m| m.module.clone()) {
            Some(module) => module,
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::PluginDoesNotExist(path.display().to_string()))?,
        };

        let factory = self.factories.get(&key).ok_or_else(|| {
            Error::PluginDoesNotExist(format!("{}: no module named '{}'", path.display(), key))
        })?;

        Ok(ModuleRef {
            key,
            path: path.to_path_buf(),
            manifest,
            factory: Arc::clone(factory),
        })
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog").field("keys", &self.keys()).finish()
    }
}

/// A plugin directory resolved to a module that has not run yet
#[derive(Clone)]
pub struct ModuleRef {
    key: String,
    path: PathBuf,
    manifest: Option<PluginManifest>,
    factory: ModuleFactory,
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl ModuleRef {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }

    /// Run the module's code
    pub fn execute(&self) -> Result<PluginModule, Failure> {
        isolate(|| (self.factory)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{info::PluginInfo, plugin::Plugin};
    use std::path::Path;
    use tempfile::TempDir;

    struct Empty;

    impl Plugin for Empty {
        fn load(&mut self, _path: &Path) -> anyhow::Result<PluginInfo> {
            Ok(PluginInfo::new("Empty", "1.0")?)
        }
    }

    impl PluginClass for Empty {
        fn new(_ctx: PluginContext) -> anyhow::Result<Self> {
            Ok(Empty)
        }
    }

    fn empty_module() -> anyhow::Result<PluginModule> {
        Ok(PluginModule::builder("empty")
            .doc("Does nothing")
            .value("__version__", "1.0")
            .plugin_class::<Empty>()?
            .build())
    }

    #[test]
    fn test_builder_items() {
        let module = empty_module().unwrap();
        assert_eq!(module.doc(), Some("Does nothing"));
        assert_eq!(module.value("__version__"), Some(&Value::from("1.0")));
        assert!(module.function("__version__").is_none());
        assert_eq!(module.entry_points().len(), 1);
        assert_eq!(module.entry_points()[0].class_name(), "Empty");
        assert!(module.has("Empty"));
    }

    #[test]
    fn test_same_class_twice_rejected() {
        let err = PluginModule::builder("twice")
            .plugin_class::<Empty>()
            .unwrap()
            .plugin_class::<Empty>()
            .err()
            .unwrap();
        assert_eq!(
            err,
            DeclarationError::AlreadyPluginClass {
                class: "Empty".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_by_directory_name() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("empty");
        std::fs::create_dir(&dir).unwrap();

        let catalog = ModuleCatalog::new().with("empty", empty_module);
        let module_ref = catalog.resolve(&dir).unwrap();
        assert_eq!(module_ref.key(), "empty");
        assert_eq!(module_ref.execute().unwrap().name(), "empty");
    }

    #[test]
    fn test_resolve_by_manifest() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("My Plugin");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("plugin.toml"), "module = \"empty\"\n").unwrap();

        let catalog = ModuleCatalog::new().with("empty", empty_module);
        let module_ref = catalog.resolve(&dir).unwrap();
        assert_eq!(module_ref.key(), "empty");
        assert!(module_ref.manifest().is_some());
    }

    #[test]
    fn test_resolve_failures() {
        let root = TempDir::new().unwrap();
        let catalog = ModuleCatalog::new().with("empty", empty_module);

        let missing = catalog.resolve(&root.path().join("nope")).unwrap_err();
        assert!(matches!(missing, Error::PluginDoesNotExist(_)));

        let file = root.path().join("empty");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(catalog.resolve(&file), Err(Error::PluginDoesNotExist(_))));

        let unknown = root.path().join("unknown");
        std::fs::create_dir(&unknown).unwrap();
        assert!(matches!(catalog.resolve(&unknown), Err(Error::PluginDoesNotExist(_))));
    }

    #[test]
    fn test_execute_is_isolated() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir(&dir).unwrap();

        let catalog = ModuleCatalog::new().with("broken", || -> anyhow::Result<PluginModule> {
            panic!("import error")
        });
        let failure = catalog.resolve(&dir).unwrap().execute().unwrap_err();
        assert!(matches!(failure, Failure::Panic(_)));
    }
}
