//! EDMC plugin host
//!
//! Loads plugins from the plugin directory and drives them with journal
//! events, either replayed from a file, tailed live, or fired by hand from
//! the interactive shell.

mod builtin;
mod cli;
mod journal;
mod plugin_integration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::CliHandler;
use edmc_plugin::HostConfig;
use plugin_integration::PluginSystem;
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How often a tailed journal is polled once it reaches its end
const TAIL_INTERVAL: Duration = Duration::from_millis(500);

/// EDMC plugin host
#[derive(Parser, Debug)]
#[command(name = "edmc-host", version)]
#[command(about = "Loads EDMC plugins and feeds them journal events", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "edmc.toml")]
    config: PathBuf,

    /// Plugin directory, overriding the configuration
    #[arg(short, long)]
    plugin_dir: Option<PathBuf>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the plugins that load
    List,
    /// Feed every line of a journal file to the plugins
    Replay { journal: PathBuf },
    /// Follow a journal file and feed new lines as they are written
    Watch { journal: PathBuf },
    /// Ask the active provider of a capability for a URL
    Url {
        capability: String,
        /// Arguments; parsed as JSON where possible
        args: Vec<String>,
    },
    /// Interactive shell (default)
    Shell,
}

fn init_logging(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "edmc-host.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(args.log_dir.as_ref());

    info!("Starting EDMC plugin host v{}", env!("CARGO_PKG_VERSION"));

    let mut config = HostConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(plugin_dir) = args.plugin_dir {
        config.plugin_dir = plugin_dir;
    }

    let system = Arc::new(PluginSystem::new(config));
    let report = system.initialize()?;
    for (name, reason) in &report.failed {
        warn!("Plugin {} failed to load: {}", name, reason);
    }

    let result = match args.command.unwrap_or(Command::Shell) {
        Command::List => {
            println!("{}", CliHandler::new(Arc::clone(&system)).list());
            Ok(())
        }
        Command::Replay { journal } => replay(&system, &journal).await,
        Command::Watch { journal } => watch(&system, &journal).await,
        Command::Url { capability, args } => {
            let args: Vec<Value> = args
                .iter()
                .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
                .collect();
            match system.plugin_manager.call_provider(&capability, &args) {
                Some(url) => println!("{}", url),
                None => println!("No URL available for {}", capability),
            }
            Ok(())
        }
        Command::Shell => CliHandler::new(Arc::clone(&system)).start_interactive().await,
    };

    system.shutdown();
    result
}

fn feed(system: &PluginSystem, line: &str, line_no: usize) {
    match system.handle_journal_line(line) {
        Ok(reports) => {
            for failure in reports.iter().flat_map(|r| r.failures.iter()) {
                warn!(
                    "Line {}: {}.{} failed on {}: {}",
                    line_no, failure.plugin, failure.method, failure.event, failure.message
                );
            }
        }
        Err(e) => error!("Line {}: {}", line_no, e),
    }
}

/// Feed every line of a journal file
async fn replay(system: &PluginSystem, journal: &PathBuf) -> Result<()> {
    let file = tokio::fs::File::open(journal)
        .await
        .with_context(|| format!("Failed to open journal {}", journal.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        feed(system, &line, line_no);
    }

    info!("Replayed {} journal lines from {}", line_no, journal.display());
    Ok(())
}

/// Read from a journal being written to.
///
/// Returns the next complete line, or `None` at end of input. A trailing
/// partial line stays in `pending` until the rest of it arrives.
async fn next_complete_line<R>(reader: &mut R, pending: &mut String) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        if reader.read_line(pending).await? == 0 {
            return Ok(None);
        }
        if pending.ends_with('\n') {
            let line = pending.trim_end_matches(['\r', '\n']).to_string();
            pending.clear();
            return Ok(Some(line));
        }
    }
}

/// Follow a journal file until interrupted
async fn watch(system: &PluginSystem, journal: &PathBuf) -> Result<()> {
    let file = tokio::fs::File::open(journal)
        .await
        .with_context(|| format!("Failed to open journal {}", journal.display()))?;
    let mut reader = BufReader::new(file);
    let mut pending = String::new();
    info!("Watching journal {} (Ctrl-C to stop)", journal.display());

    let mut line_no = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping journal watch");
                break;
            }
            line = next_complete_line(&mut reader, &mut pending) => match line? {
                Some(line) => {
                    line_no += 1;
                    feed(system, &line, line_no);
                }
                None => tokio::time::sleep(TAIL_INTERVAL).await,
            }
        }
    }

    Ok(())
}
