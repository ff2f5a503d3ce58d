//! Compatibility adapter for plugins written against the free-function API.
//!
//! A legacy module has no plugin class. Instead it defines `plugin_start3`
//! and any of a fixed set of callback and provider functions. The adapter
//! wraps such a module into a [`LegacyPlugin`] whose synthesized hooks break
//! each modern event out into the positional arguments the legacy function
//! expects.

use crate::{
    Error,
    event::{Event, EventPayload, capabilities, names},
    info::{PluginInfo, coerce_version, unknown_version},
    markers::{ClassMarkers, DeclarationError},
    module::PluginModule,
    plugin::{Plugin, PluginContext},
    ui::{Container, Widget},
};
use serde_json::Value;
use std::{fmt, path::Path, sync::Arc};
use tracing::warn;

pub const PLUGIN_START3: &str = "plugin_start3";
pub const PLUGIN_START: &str = "plugin_start";
pub const PLUGIN_APP: &str = "plugin_app";
pub const PLUGIN_PREFS: &str = "plugin_prefs";

/// A value passed to or returned from a legacy function
#[derive(Debug, Clone, Default)]
pub enum LegacyValue {
    #[default]
    None,
    Json(Value),
    Widget(Widget),
    Tuple(Vec<LegacyValue>),
}

impl LegacyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LegacyValue::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            LegacyValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            LegacyValue::None => false,
            LegacyValue::Json(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
            LegacyValue::Widget(_) => true,
            LegacyValue::Tuple(items) => !items.is_empty(),
        }
    }
}

impl From<Value> for LegacyValue {
    fn from(value: Value) -> Self {
        LegacyValue::Json(value)
    }
}

impl From<&str> for LegacyValue {
    fn from(value: &str) -> Self {
        LegacyValue::Json(Value::from(value))
    }
}

impl From<String> for LegacyValue {
    fn from(value: String) -> Self {
        LegacyValue::Json(Value::from(value))
    }
}

impl From<bool> for LegacyValue {
    fn from(value: bool) -> Self {
        LegacyValue::Json(Value::Bool(value))
    }
}

impl From<Widget> for LegacyValue {
    fn from(widget: Widget) -> Self {
        LegacyValue::Widget(widget)
    }
}

impl<T: Into<LegacyValue>> From<Option<T>> for LegacyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

type LegacyCall = Arc<dyn Fn(&[LegacyValue]) -> anyhow::Result<LegacyValue> + Send + Sync>;

/// A top-level function of a legacy module, with its declared arity
#[derive(Clone)]
pub struct LegacyFunction {
    arity: usize,
    call: LegacyCall,
}

impl LegacyFunction {
    pub fn new<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&[LegacyValue]) -> anyhow::Result<LegacyValue> + Send + Sync + 'static,
    {
        Self {
            arity,
            call: Arc::new(f),
        }
    }

    /// Number of positional arguments the function takes
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[LegacyValue]) -> anyhow::Result<LegacyValue> {
        if args.len() != self.arity {
            anyhow::bail!(
                "takes {} positional arguments but {} were given",
                self.arity,
                args.len()
            );
        }
        (self.call)(args)
    }
}

impl fmt::Debug for LegacyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyFunction").field("arity", &self.arity).finish()
    }
}

type Breakout = fn(&Event) -> Vec<LegacyValue>;
type Convert = fn(&[Value]) -> Vec<LegacyValue>;

struct LegacyCallback {
    event: &'static str,
    function: &'static str,
    arity: usize,
    breakout: Breakout,
}

struct LegacyProvider {
    capability: &'static str,
    function: &'static str,
    arity: usize,
    convert: Convert,
}

const LEGACY_CALLBACKS: &[LegacyCallback] = &[
    LegacyCallback {
        event: names::JOURNAL_ENTRY,
        function: "journal_entry",
        arity: 6,
        breakout: journal_breakout,
    },
    LegacyCallback {
        event: names::JOURNAL_ENTRY_CQC,
        function: "journal_entry_cqc",
        arity: 4,
        breakout: cqc_breakout,
    },
    LegacyCallback {
        event: names::DASHBOARD_ENTRY,
        function: "dashboard_entry",
        arity: 3,
        breakout: dashboard_breakout,
    },
    LegacyCallback {
        event: names::CAPI_DATA,
        function: "cmdr_data",
        arity: 2,
        breakout: capi_breakout,
    },
    LegacyCallback {
        event: names::PREFERENCES_CLOSED,
        function: "prefs_changed",
        arity: 2,
        breakout: prefs_breakout,
    },
    LegacyCallback {
        event: names::SHUTDOWN,
        function: "plugin_stop",
        arity: 0,
        breakout: no_arguments,
    },
    LegacyCallback {
        event: names::EDSM_NOTIFY_SYSTEM,
        function: "edsm_notify_system",
        arity: 1,
        breakout: data_breakout,
    },
    LegacyCallback {
        event: names::INARA_NOTIFY_LOCATION,
        function: "inara_notify_location",
        arity: 1,
        breakout: data_breakout,
    },
    LegacyCallback {
        event: names::INARA_NOTIFY_SHIP,
        function: "inara_notify_ship",
        arity: 1,
        breakout: data_breakout,
    },
];

const LEGACY_PROVIDERS: &[LegacyProvider] = &[
    LegacyProvider {
        capability: capabilities::SHIPYARD_URL,
        function: "shipyard_url",
        arity: 2,
        convert: identity,
    },
    LegacyProvider {
        capability: capabilities::SYSTEM_URL,
        function: "system_url",
        arity: 1,
        convert: identity,
    },
    LegacyProvider {
        capability: capabilities::STATION_URL,
        function: "station_url",
        arity: 2,
        convert: identity,
    },
];

fn payload_value(event: &Event) -> Value {
    match event.payload() {
        EventPayload::Empty => Value::Null,
        EventPayload::Data(data) => data.clone(),
        EventPayload::Dict(map) => Value::Object(map.clone()),
        EventPayload::Journal(journal) => Value::Object(journal.entry().clone()),
    }
}

fn commander_args(event: &Event) -> [LegacyValue; 2] {
    match event.journal_entry() {
        Some(journal) => [journal.commander().into(), journal.is_beta().into()],
        None => [event["cmdr"].clone().into(), event["is_beta"].as_bool().unwrap_or(false).into()],
    }
}

fn journal_parts(event: &Event) -> (LegacyValue, LegacyValue, Value, Value) {
    match event.journal_entry() {
        Some(journal) => (
            journal.system().map(str::to_string).into(),
            journal.station().map(str::to_string).into(),
            Value::Object(journal.entry().clone()),
            Value::Object(journal.state().clone()),
        ),
        None => (LegacyValue::None, LegacyValue::None, payload_value(event), Value::Null),
    }
}

fn journal_breakout(event: &Event) -> Vec<LegacyValue> {
    let [cmdr, is_beta] = commander_args(event);
    let (system, station, entry, state) = journal_parts(event);
    vec![cmdr, is_beta, system, station, entry.into(), state.into()]
}

fn cqc_breakout(event: &Event) -> Vec<LegacyValue> {
    let [cmdr, is_beta] = commander_args(event);
    let (_, _, entry, state) = journal_parts(event);
    vec![cmdr, is_beta, entry.into(), state.into()]
}

fn dashboard_breakout(event: &Event) -> Vec<LegacyValue> {
    let [cmdr, is_beta] = commander_args(event);
    let (_, _, entry, _) = journal_parts(event);
    vec![cmdr, is_beta, entry.into()]
}

fn capi_breakout(event: &Event) -> Vec<LegacyValue> {
    let data = match event.get("data") {
        Some(data) => data.clone(),
        None => payload_value(event),
    };
    vec![data.into(), event["is_beta"].as_bool().unwrap_or(false).into()]
}

fn prefs_breakout(event: &Event) -> Vec<LegacyValue> {
    commander_args(event).into()
}

fn data_breakout(event: &Event) -> Vec<LegacyValue> {
    vec![payload_value(event).into()]
}

fn no_arguments(_event: &Event) -> Vec<LegacyValue> {
    Vec::new()
}

fn identity(args: &[Value]) -> Vec<LegacyValue> {
    args.iter().cloned().map(LegacyValue::Json).collect()
}

/// A returned string is the URL; anything falsy means no URL
fn url_result(value: LegacyValue) -> Option<String> {
    if !value.is_truthy() {
        return None;
    }
    value.as_str().map(str::to_string)
}

/// A legacy module driven through the [`Plugin`] contract
pub struct LegacyPlugin {
    module: Arc<PluginModule>,
    ctx: PluginContext,
    start3: LegacyFunction,
}

impl fmt::Debug for LegacyPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyPlugin")
            .field("module", &self.module.name())
            .field("plugin", &self.ctx.name())
            .finish()
    }
}

impl LegacyPlugin {
    /// Wrap a legacy module.
    ///
    /// Nothing in the module is called here; the function signatures are
    /// checked against the fixed tables up front.
    pub fn new(module: Arc<PluginModule>, ctx: PluginContext) -> crate::Result<Self> {
        let start3 = match module.function(PLUGIN_START3) {
            Some(start3) => start3.clone(),
            None if module.has(PLUGIN_START) => {
                return Err(Error::LegacyPluginNeedsMigrating(module.name().to_string()));
            }
            None => return Err(Error::LegacyPluginHasNoStart3(module.name().to_string())),
        };

        let expected = LEGACY_CALLBACKS
            .iter()
            .map(|c| (c.function, c.arity))
            .chain(LEGACY_PROVIDERS.iter().map(|p| (p.function, p.arity)))
            .chain([(PLUGIN_START3, 1), (PLUGIN_APP, 1), (PLUGIN_PREFS, 3)]);
        for (function, arity) in expected {
            if let Some(found) = module.function(function)
                && found.arity() != arity
            {
                return Err(Error::PluginLoading(format!(
                    "{}: {}() takes {} positional arguments, expected {}",
                    module.name(),
                    function,
                    found.arity(),
                    arity
                )));
            }
        }

        Ok(Self { module, ctx, start3 })
    }

    /// Hooks and providers synthesized from the functions `module` defines
    pub fn markers(module: &PluginModule) -> Result<ClassMarkers<LegacyPlugin>, DeclarationError> {
        let mut markers = ClassMarkers::new();
        for callback in LEGACY_CALLBACKS {
            let Some(function) = module.function(callback.function).cloned() else {
                continue;
            };
            let breakout = callback.breakout;
            markers = markers.hook(
                callback.function,
                &[callback.event],
                move |_plugin: &mut LegacyPlugin, event: &Event| {
                    function.call(&breakout(event)).map(|_| ())
                },
            )?;
        }
        for provider in LEGACY_PROVIDERS {
            let Some(function) = module.function(provider.function).cloned() else {
                continue;
            };
            let convert = provider.convert;
            markers = markers.provider(
                provider.capability,
                provider.function,
                move |_plugin: &mut LegacyPlugin, args: &[Value]| {
                    Ok(url_result(function.call(&convert(args))?))
                },
            )?;
        }
        Ok(markers)
    }

    pub fn module(&self) -> &PluginModule {
        &self.module
    }

    fn info(&self, name: String) -> anyhow::Result<PluginInfo> {
        let version = match self.module.value("__version__").and_then(Value::as_str) {
            Some(raw) => coerce_version(raw).unwrap_or_else(|e| {
                self.ctx.logger().in_scope(|| {
                    warn!("Could not parse version of legacy plugin {}: {}", name, e)
                });
                unknown_version()
            }),
            None => unknown_version(),
        };

        let mut info = PluginInfo::new(name, version)?;
        let authors = self
            .module
            .value("__author__")
            .or_else(|| self.module.value("__credits__"));
        match authors {
            Some(Value::String(author)) => info = info.with_author(author.clone()),
            Some(Value::Array(list)) => {
                info = info.with_authors(list.iter().filter_map(Value::as_str).map(str::to_string))
            }
            _ => {}
        }
        if let Some(doc) = self.module.doc() {
            info = info.with_comment(doc);
        }
        Ok(info)
    }

    /// Normalize what `plugin_app` / `plugin_prefs` returned into one widget
    fn container(&self, function: &str, value: LegacyValue) -> Option<Widget> {
        match value {
            LegacyValue::None => None,
            LegacyValue::Widget(widget) => Some(Container::row(vec![widget]).into_widget()),
            LegacyValue::Tuple(items) if items.len() == 2 => {
                let mut widgets = Vec::with_capacity(2);
                for item in items {
                    match item {
                        LegacyValue::Widget(widget) => widgets.push(widget),
                        other => return self.unexpected_ui(function, &other),
                    }
                }
                Some(Container::row(widgets).into_widget())
            }
            other => self.unexpected_ui(function, &other),
        }
    }

    fn unexpected_ui(&self, function: &str, value: &LegacyValue) -> Option<Widget> {
        self.ctx.logger().in_scope(|| {
            warn!(
                "{}.{}() returned an unexpected value, ignoring it: {:?}",
                self.module.name(),
                function,
                value
            )
        });
        None
    }
}

impl Plugin for LegacyPlugin {
    fn load(&mut self, path: &Path) -> anyhow::Result<PluginInfo> {
        let returned = self
            .start3
            .call(&[path.display().to_string().into()])?;
        match returned.as_str() {
            Some(name) if !name.is_empty() => self.info(name.to_string()),
            _ => anyhow::bail!(
                "{}.{}() did not return a valid PluginInfo",
                self.module.name(),
                PLUGIN_START3
            ),
        }
    }

    fn unload(&mut self) -> anyhow::Result<()> {
        Err(Error::NotSupported("legacy plugins cannot be unloaded".to_string()).into())
    }

    fn reload(&mut self) -> anyhow::Result<()> {
        Err(Error::NotSupported("legacy plugins cannot be reloaded".to_string()).into())
    }

    fn setup_ui(&mut self, parent: &Widget) -> anyhow::Result<Option<Widget>> {
        let Some(app) = self.module.function(PLUGIN_APP) else {
            return Ok(None);
        };
        let returned = app.call(&[parent.clone().into()])?;
        Ok(self.container(PLUGIN_APP, returned))
    }

    fn setup_preferences_ui(
        &mut self,
        parent: &Widget,
        commander: Option<&str>,
        is_beta: bool,
    ) -> anyhow::Result<Option<Widget>> {
        let Some(prefs) = self.module.function(PLUGIN_PREFS) else {
            return Ok(None);
        };
        let returned = prefs.call(&[
            parent.clone().into(),
            commander.map(str::to_string).into(),
            is_beta.into(),
        ])?;
        Ok(self.container(PLUGIN_PREFS, returned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::JournalEntry;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Weak;

    fn ctx() -> PluginContext {
        PluginContext::new("legacy", "/plugins/legacy", Weak::new())
    }

    fn start3(name: &'static str) -> LegacyFunction {
        LegacyFunction::new(1, move |_| Ok(name.into()))
    }

    #[test]
    fn test_missing_start3() {
        let module = Arc::new(PluginModule::builder("empty").build());
        assert!(matches!(
            LegacyPlugin::new(module, ctx()),
            Err(Error::LegacyPluginHasNoStart3(_))
        ));

        let module = Arc::new(
            PluginModule::builder("old")
                .function(PLUGIN_START, LegacyFunction::new(0, |_| Ok(LegacyValue::None)))
                .build(),
        );
        assert!(matches!(
            LegacyPlugin::new(module, ctx()),
            Err(Error::LegacyPluginNeedsMigrating(_))
        ));
    }

    #[test]
    fn test_wrong_arity_rejected_before_call() {
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let module = Arc::new(
            PluginModule::builder("bad")
                .function(
                    PLUGIN_START3,
                    LegacyFunction::new(2, move |_| {
                        *flag.lock() = true;
                        Ok("bad".into())
                    }),
                )
                .build(),
        );
        assert!(matches!(LegacyPlugin::new(module, ctx()), Err(Error::PluginLoading(_))));
        assert!(!*called.lock());

        let module = Arc::new(
            PluginModule::builder("bad_hook")
                .function(PLUGIN_START3, start3("bad_hook"))
                .function("journal_entry", LegacyFunction::new(4, |_| Ok(LegacyValue::None)))
                .build(),
        );
        assert!(matches!(LegacyPlugin::new(module, ctx()), Err(Error::PluginLoading(_))));
    }

    #[test]
    fn test_load_builds_info() {
        let module = Arc::new(
            PluginModule::builder("edsm")
                .doc("Sends data to EDSM")
                .function(PLUGIN_START3, start3("EDSM"))
                .value("__version__", "5.4")
                .value("__credits__", "Jane")
                .build(),
        );
        let mut plugin = LegacyPlugin::new(module, ctx()).unwrap();
        let info = plugin.load(Path::new("/plugins/edsm")).unwrap();
        assert_eq!(info.name(), "EDSM");
        assert_eq!(info.version().to_string(), "5.4.0");
        assert_eq!(info.authors(), Some(&["Jane".to_string()][..]));
        assert_eq!(info.comment(), Some("Sends data to EDSM"));
    }

    #[test]
    fn test_load_without_version() {
        let module = Arc::new(
            PluginModule::builder("plain")
                .function(PLUGIN_START3, start3("Plain"))
                .value("__author__", json!(["A", "B"]))
                .build(),
        );
        let mut plugin = LegacyPlugin::new(module, ctx()).unwrap();
        let info = plugin.load(Path::new("/plugins/plain")).unwrap();
        assert_eq!(info.version(), &unknown_version());
        assert_eq!(info.authors().unwrap().len(), 2);
    }

    #[test]
    fn test_start3_must_return_name() {
        let module = Arc::new(
            PluginModule::builder("nameless")
                .function(PLUGIN_START3, LegacyFunction::new(1, |_| Ok(LegacyValue::None)))
                .build(),
        );
        let mut plugin = LegacyPlugin::new(module, ctx()).unwrap();
        let err = plugin.load(Path::new("/plugins/nameless")).unwrap_err();
        assert!(err.to_string().contains("did not return a valid PluginInfo"));
    }

    #[test]
    fn test_journal_breakout() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let module = PluginModule::builder("journal")
            .function(PLUGIN_START3, start3("Journal"))
            .function(
                "journal_entry",
                LegacyFunction::new(6, move |args| {
                    sink.lock().extend(args.iter().cloned());
                    Ok(LegacyValue::None)
                }),
            )
            .build();
        let markers = LegacyPlugin::markers(&module).unwrap();
        assert_eq!(markers.events_for("journal_entry").unwrap(), &[names::JOURNAL_ENTRY.to_string()]);

        let entry = json!({"event": "FSDJump", "StarSystem": "Sol"});
        let event = Event::journal(
            names::JOURNAL_ENTRY,
            JournalEntry::new("Jameson", false, entry.as_object().unwrap().clone())
                .with_system(Some("Sol".to_string())),
        );
        let mut plugin = LegacyPlugin::new(Arc::new(module.clone()), ctx()).unwrap();
        (markers.hooks()[0].call())(&mut plugin, &event).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].as_str(), Some("Jameson"));
        assert_eq!(seen[2].as_str(), Some("Sol"));
        assert!(matches!(seen[3], LegacyValue::None));
        assert_eq!(seen[4].as_json(), Some(&entry));
    }

    #[test]
    fn test_stop_has_no_arguments() {
        let stopped = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&stopped);
        let module = PluginModule::builder("stop")
            .function(PLUGIN_START3, start3("Stop"))
            .function(
                "plugin_stop",
                LegacyFunction::new(0, move |_| {
                    *counter.lock() += 1;
                    Ok(LegacyValue::None)
                }),
            )
            .build();
        let markers = LegacyPlugin::markers(&module).unwrap();
        let mut plugin = LegacyPlugin::new(Arc::new(module), ctx()).unwrap();
        (markers.hooks()[0].call())(&mut plugin, &Event::new(names::SHUTDOWN)).unwrap();
        assert_eq!(*stopped.lock(), 1);
    }

    #[test]
    fn test_provider_convert() {
        let module = PluginModule::builder("links")
            .function(PLUGIN_START3, start3("Links"))
            .function(
                "system_url",
                LegacyFunction::new(1, |args| {
                    Ok(match args[0].as_str() {
                        Some("") => false.into(),
                        Some("zero") => Value::from(0).into(),
                        Some(system) => format!("https://example.invalid/system/{}", system).into(),
                        None => LegacyValue::None,
                    })
                }),
            )
            .build();
        let markers = LegacyPlugin::markers(&module).unwrap();
        let provider = &markers.providers()[0];
        assert_eq!(provider.capability(), capabilities::SYSTEM_URL);

        let mut plugin = LegacyPlugin::new(Arc::new(module.clone()), ctx()).unwrap();
        assert_eq!(
            (provider.call())(&mut plugin, &[json!("Sol")]).unwrap().as_deref(),
            Some("https://example.invalid/system/Sol")
        );
        assert_eq!((provider.call())(&mut plugin, &[json!("")]).unwrap(), None);
        assert_eq!((provider.call())(&mut plugin, &[json!("zero")]).unwrap(), None);
        assert_eq!((provider.call())(&mut plugin, &[json!(null)]).unwrap(), None);
    }

    #[test]
    fn test_ui_normalization() {
        let module = Arc::new(
            PluginModule::builder("ui")
                .function(PLUGIN_START3, start3("UI"))
                .function(
                    PLUGIN_APP,
                    LegacyFunction::new(1, |_| {
                        Ok(LegacyValue::Tuple(vec![Widget::new("label").into(), Widget::new("status").into()]))
                    }),
                )
                .function(PLUGIN_PREFS, LegacyFunction::new(3, |_| Ok(json!(42).into())))
                .build(),
        );
        let mut plugin = LegacyPlugin::new(module, ctx()).unwrap();
        let parent = Widget::new(());

        let frame = plugin.setup_ui(&parent).unwrap().unwrap();
        assert_eq!(frame.as_container().unwrap().children().len(), 2);
        assert!(plugin.setup_preferences_ui(&parent, Some("Jameson"), false).unwrap().is_none());
    }

    #[test]
    fn test_unload_not_supported() {
        let module = Arc::new(
            PluginModule::builder("legacy")
                .function(PLUGIN_START3, start3("Legacy"))
                .build(),
        );
        let mut plugin = LegacyPlugin::new(module, ctx()).unwrap();
        let err = plugin.unload().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotSupported(_))));
    }
}
