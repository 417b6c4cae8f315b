//! Command-line interface for the plugin lifecycle runtime.
//!
//! Each invocation starts the plugin system from the configured plugin
//! directory and state file, runs one command and shuts the system down.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::controller::PluginController;
use crate::events::{EventBus, LifecycleEvent};
use crate::installer::DirectoryInstaller;
use crate::loader::DirectoryPluginLoader;
use crate::logging::{init_file_logging, init_logging};
use crate::state::JsonFileStateStore;

pub mod modules;
pub mod plugins;

/// nova-lifecycle - manage plugins and their modules
#[derive(Parser)]
#[command(name = "nova-lifecycle")]
#[command(about = "Install, enable and inspect plugins")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print lifecycle events as they happen
    #[arg(long, global = true)]
    pub events: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List installed plugins
    List(plugins::ListArgs),
    /// Show details of one plugin
    Status(plugins::StatusArgs),
    /// Enable plugins and the plugins they require
    Enable(plugins::EnableArgs),
    /// Disable a plugin
    Disable(plugins::DisableArgs),
    /// Uninstall a plugin
    Uninstall(plugins::UninstallArgs),
    /// Install plugin descriptors
    Install(plugins::InstallArgs),
    /// Enable a plugin module
    EnableModule(modules::ModuleArgs),
    /// Disable a plugin module
    DisableModule(modules::ModuleArgs),
    /// Pick up plugins added to the plugin directory
    Scan,
    /// Restart every enabled module
    WarmRestart,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RuntimeConfig::load_or_default(cli.config.as_deref())?;
    match &config.logging.file {
        Some(file) => init_file_logging(file, &config.logging.level, cli.verbose)?,
        None => init_logging(&config.logging.level, cli.verbose)?,
    }

    let events = Arc::new(EventBus::new());
    let printer = cli
        .events
        .then(|| spawn_event_printer(events.subscribe_channel()));

    let controller = Arc::new(build_controller(&config, events));
    blocking(&controller, |c| c.init()).await?;

    let result = dispatch(&controller, cli.command).await;

    blocking(&controller, |c| {
        c.shutdown();
        Ok(())
    })
    .await?;
    drop(controller);

    if let Some(printer) = printer {
        printer.await?;
    }
    result
}

fn build_controller(config: &RuntimeConfig, events: Arc<EventBus>) -> PluginController {
    let store = Arc::new(JsonFileStateStore::new(&config.paths.state_file));
    PluginController::new(config.enabler_config(), store, events)
        .with_loader(Arc::new(DirectoryPluginLoader::new(&config.paths.plugin_dir)))
        .with_installer(Arc::new(DirectoryInstaller::new(&config.paths.plugin_dir)))
}

async fn dispatch(controller: &Arc<PluginController>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::List(args) => plugins::list(controller, args),
        Commands::Status(args) => plugins::status(controller, args),
        Commands::Enable(args) => plugins::enable(controller, args).await,
        Commands::Disable(args) => plugins::disable(controller, args).await,
        Commands::Uninstall(args) => plugins::uninstall(controller, args).await,
        Commands::Install(args) => plugins::install(controller, args).await,
        Commands::EnableModule(args) => modules::enable(controller, args).await,
        Commands::DisableModule(args) => modules::disable(controller, args).await,
        Commands::Scan => plugins::scan(controller).await,
        Commands::WarmRestart => {
            blocking(controller, |c| {
                c.warm_restart();
                Ok(())
            })
            .await?;
            println!("Modules restarted");
            Ok(())
        }
    }
}

/// Run a controller call on the blocking thread pool
pub(crate) async fn blocking<T, F>(controller: &Arc<PluginController>, call: F) -> anyhow::Result<T>
where
    F: FnOnce(&PluginController) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let controller = Arc::clone(controller);
    let result = tokio::task::spawn_blocking(move || call(&controller)).await?;
    Ok(result?)
}

fn spawn_event_printer(mut receiver: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => println!(
                    "[{}] {}{}",
                    event.timestamp.format("%H:%M:%S%.3f"),
                    event.event_type,
                    event
                        .subject
                        .map(|s| format!(" {}", s))
                        .unwrap_or_default()
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
