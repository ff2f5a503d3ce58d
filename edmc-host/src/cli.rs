use crate::plugin_integration::PluginSystem;
use anyhow::{Result, anyhow};
use edmc_plugin::{Event, PluginManager};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

const HELP: &str = "\
Commands:
  help                              Show this help
  list                              List loaded plugins
  status                            Show plugin system status
  fire <event> [json]               Fire an event with an optional JSON payload
  journal <json>                    Feed one journal line
  url <capability> [args...]        Ask the active provider for a URL
  providers <capability>            Show the plugins offering a capability
  provider <capability> [plugin]    Set or clear the active provider
  unload <plugin>                   Unload a plugin
  reload <plugin>                   Reload a plugin
  exit                              Leave the shell";

/// CLI command handler for plugin administration
pub struct CliHandler {
    system: Arc<PluginSystem>,
}

impl CliHandler {
    /// Create a new CLI handler
    pub fn new(system: Arc<PluginSystem>) -> Self {
        Self { system }
    }

    fn manager(&self) -> &PluginManager {
        &self.system.plugin_manager
    }

    /// Parse and execute a command line
    pub fn execute_command(&self, command_line: &str) -> Result<String> {
        let trimmed = command_line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(String::new());
        }

        let (command, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match command.to_lowercase().as_str() {
            "help" => Ok(HELP.to_string()),
            "list" => Ok(self.list()),
            "status" => {
                let status = self.system.status();
                Ok(format!(
                    "Initialized: {}\nPlugins: {} ({} legacy)\nCallbacks: {}\nActive providers: {}",
                    status.initialized,
                    status.total_plugins,
                    status.legacy_plugins,
                    status.registered_callbacks,
                    status.active_providers
                ))
            }
            "fire" => {
                let (name, payload) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if name.is_empty() {
                    return Err(anyhow!("Usage: fire <event> [json]"));
                }
                let event = parse_event(name, payload.trim())?;
                let report = self.manager().fire_event(&event);
                Ok(format!(
                    "Delivered to {} callbacks, {} failed",
                    report.delivered,
                    report.failures.len()
                ))
            }
            "journal" => {
                let reports = self.system.handle_journal_line(rest)?;
                let delivered: usize = reports.iter().map(|r| r.delivered).sum();
                Ok(format!("Fired {} events to {} callbacks", reports.len(), delivered))
            }
            "url" => {
                let (capability, args) = args
                    .split_first()
                    .ok_or_else(|| anyhow!("Usage: url <capability> [args...]"))?;
                let args: Vec<Value> = args.iter().map(|arg| parse_arg(arg)).collect();
                Ok(self
                    .manager()
                    .call_provider(capability, &args)
                    .unwrap_or_else(|| format!("No URL available for {}", capability)))
            }
            "providers" => {
                let capability = args.first().ok_or_else(|| anyhow!("Usage: providers <capability>"))?;
                let candidates = self.manager().provider_candidates(capability);
                let active = self.manager().resolve_provider(capability);
                Ok(candidates
                    .iter()
                    .map(|plugin| {
                        let marker = if active.as_ref().is_some_and(|p| p.plugin() == plugin) {
                            "*"
                        } else {
                            " "
                        };
                        format!("{} {}", marker, plugin)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            "provider" => match args.as_slice() {
                [capability] => {
                    let cleared = self.manager().clear_active_provider(capability);
                    Ok(match cleared {
                        Some(plugin) => format!("{} no longer provides {}", plugin, capability),
                        None => format!("Nothing provides {}", capability),
                    })
                }
                [capability, plugin @ ..] => {
                    let plugin = plugin.join(" ");
                    self.manager().set_active_provider(capability, &plugin)?;
                    Ok(format!("{} now provides {}", plugin, capability))
                }
                [] => Err(anyhow!("Usage: provider <capability> [plugin]")),
            },
            "unload" => {
                if self.manager().unload_plugin(rest) {
                    Ok(format!("Plugin unloaded: {}", rest))
                } else {
                    Err(anyhow!("Plugin not found: {}", rest))
                }
            }
            "reload" => {
                let plugin = self.manager().reload_plugin(rest)?;
                Ok(format!("Plugin reloaded: {}", plugin.info()))
            }
            other => Err(anyhow!("Unknown command: {} (try 'help')", other)),
        }
    }

    /// One line per loaded plugin
    pub fn list(&self) -> String {
        let plugins = self.manager().plugins();
        if plugins.is_empty() {
            return "No plugins loaded".to_string();
        }
        plugins
            .iter()
            .map(|plugin| {
                format!(
                    "{:<20} {:<16} {}{}",
                    plugin.name(),
                    plugin.info().version(),
                    plugin.path().display(),
                    if plugin.is_legacy() { " (legacy)" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Start interactive CLI mode
    pub async fn start_interactive(&self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        stdout
            .write_all(b"EDMC plugin shell\nType 'help' for help, 'exit' to quit\n")
            .await?;

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(input) = lines.next_line().await? else {
                break;
            };
            let command_line = input.trim();

            if command_line == "exit" || command_line == "quit" {
                break;
            }

            let output = match self.execute_command(command_line) {
                Ok(result) => result,
                Err(e) => format!("Error: {:#}", e),
            };
            if !output.is_empty() {
                stdout.write_all(output.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
        }

        info!("Leaving plugin shell");
        Ok(())
    }
}

/// JSON if it parses, otherwise a plain string
fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

fn parse_event(name: &str, payload: &str) -> Result<Event> {
    if payload.is_empty() {
        return Ok(Event::new(name));
    }
    Ok(match serde_json::from_str::<Value>(payload)? {
        Value::Object(map) => Event::with_dict(name, map),
        other => Event::with_data(name, other),
    })
}
