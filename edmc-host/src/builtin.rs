//! Plugins shipped with the host.
//!
//! `ship_links` is a plugin class using the attribute macros; `event_log`
//! is written against the legacy free-function API.

use edmc_plugin::{
    Event, HostConfig, LegacyFunction, LegacyValue, ModuleCatalog, Plugin, PluginContext, PluginInfo,
    PluginModule, edmc_plugin,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{path::Path, sync::Arc};
use tracing::{debug, info};
use urlencoding::encode;

pub const SHIP_LINKS: &str = "ship_links";
pub const EVENT_LOG: &str = "event_log";

/// Module catalog holding every built-in plugin
pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with(SHIP_LINKS, ship_links_module)
        .with(EVENT_LOG, event_log_module)
}

/// Create a directory for each built-in plugin that has none yet, enabled
/// or disabled
pub fn install(config: &HostConfig) -> std::io::Result<()> {
    for name in [SHIP_LINKS, EVENT_LOG] {
        let dir = config.plugin_dir.join(name);
        let disabled = config
            .plugin_dir
            .join(format!("{}{}", name, config.disabled_suffix));
        if !dir.exists() && !disabled.exists() {
            debug!("Installing built-in plugin: {}", name);
            std::fs::create_dir_all(&dir)?;
        }
    }
    Ok(())
}

/// Shipyard, system and station links
pub struct ShipLinks {
    ctx: PluginContext,
    jumps: usize,
}

impl Plugin for ShipLinks {
    fn load(&mut self, _path: &Path) -> anyhow::Result<PluginInfo> {
        Ok(PluginInfo::new("Ship Links", env!("CARGO_PKG_VERSION"))?
            .with_comment("Links to ship, system and station pages"))
    }

    fn unload(&mut self) -> anyhow::Result<()> {
        self.ctx
            .logger()
            .in_scope(|| info!("Jumps seen this session: {}", self.jumps()));
        Ok(())
    }
}

#[edmc_plugin]
impl ShipLinks {
    fn new(ctx: PluginContext) -> anyhow::Result<Self> {
        Ok(Self { ctx, jumps: 0 })
    }

    pub fn jumps(&self) -> usize {
        self.jumps
    }

    #[hook("core.journal_entry")]
    fn on_journal(&mut self, event: &Event) -> anyhow::Result<()> {
        if matches!(event.event_name(), Some("FSDJump" | "CarrierJump")) {
            self.jumps += 1;
        }
        Ok(())
    }

    #[provider("shipyard_url")]
    fn shipyard_url(&mut self, args: &[Value]) -> anyhow::Result<Option<String>> {
        let Some(loadout) = args.first().filter(|v| v.is_object()) else {
            return Ok(None);
        };
        let Some(ship) = loadout.get("Ship").and_then(Value::as_str) else {
            return Ok(None);
        };
        let is_beta = args.get(1).and_then(Value::as_bool).unwrap_or(false);
        let host = if is_beta { "beta.coriolis.io" } else { "coriolis.io" };
        Ok(Some(format!("https://{}/outfit/{}", host, encode(&ship.to_lowercase()))))
    }

    #[provider("system_url")]
    fn system_url(&mut self, args: &[Value]) -> anyhow::Result<Option<String>> {
        Ok(args
            .first()
            .and_then(Value::as_str)
            .filter(|system| !system.is_empty())
            .map(|system| format!("https://www.edsm.net/en/system?systemName={}", encode(system))))
    }
}

fn ship_links_module() -> anyhow::Result<PluginModule> {
    Ok(PluginModule::builder(SHIP_LINKS)
        .doc("Links to ship, system and station pages")
        .plugin_class::<ShipLinks>()?
        .build())
}

/// A legacy plugin logging journal events and offering station links
fn event_log_module() -> anyhow::Result<PluginModule> {
    let seen: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);

    Ok(PluginModule::builder(EVENT_LOG)
        .doc("Logs every journal event")
        .value("__version__", "1.2")
        .value("__author__", "EDMC")
        .function(
            "plugin_start3",
            LegacyFunction::new(1, |_args| Ok("Event Log".into())),
        )
        .function(
            "journal_entry",
            LegacyFunction::new(6, move |args| {
                *counter.lock() += 1;
                let cmdr = args[0].as_str().unwrap_or("?");
                let event = args[4]
                    .as_json()
                    .and_then(|entry| entry.get("event"))
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                info!("[{}] {}", cmdr, event);
                Ok(LegacyValue::None)
            }),
        )
        .function(
            "plugin_stop",
            LegacyFunction::new(0, move |_args| {
                info!("Journal events logged: {}", *seen.lock());
                Ok(LegacyValue::None)
            }),
        )
        .function(
            "station_url",
            LegacyFunction::new(2, |args| {
                let (Some(system), Some(station)) = (args[0].as_str(), args[1].as_str()) else {
                    return Ok(LegacyValue::None);
                };
                Ok(format!(
                    "https://inara.cz/elite/station/?search={}%20%5B{}%5D",
                    encode(station),
                    encode(system)
                )
                .into())
            }),
        )
        .build())
}
