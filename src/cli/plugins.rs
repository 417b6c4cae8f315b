//! Plugin-level commands.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use super::blocking;
use crate::controller::PluginController;
use crate::plugin::Plugin;
use crate::state::RestartAction;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Only show enabled plugins
    #[arg(long)]
    pub enabled: bool,
}

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs {
    /// Plugin key
    pub key: String,
}

/// Arguments for the enable command
#[derive(Args)]
pub struct EnableArgs {
    /// Plugin keys
    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// Arguments for the disable command
#[derive(Args)]
pub struct DisableArgs {
    /// Plugin key
    pub key: String,

    /// Do not remember the choice across restarts
    #[arg(long)]
    pub transient: bool,
}

/// Arguments for the uninstall command
#[derive(Args)]
pub struct UninstallArgs {
    /// Plugin key
    pub key: String,
}

/// Arguments for the install command
#[derive(Args)]
pub struct InstallArgs {
    /// Plugin descriptor files
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,
}

pub fn list(controller: &Arc<PluginController>, args: ListArgs) -> anyhow::Result<()> {
    let plugins = if args.enabled {
        controller.enabled_plugins()
    } else {
        controller.plugins()
    };

    if plugins.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    println!("{:<28} {:<12} {:<12} NOTES", "KEY", "VERSION", "STATE");
    for plugin in &plugins {
        println!(
            "{:<28} {:<12} {:<12} {}",
            plugin.key(),
            plugin.version().to_string(),
            plugin.state().as_str(),
            notes(controller, plugin.as_ref())
        );
    }
    Ok(())
}

fn notes(controller: &PluginController, plugin: &dyn Plugin) -> String {
    let mut notes = Vec::new();
    if plugin.is_system() {
        notes.push("system".to_string());
    }
    match controller.restart_action(plugin.key()) {
        RestartAction::None => {}
        action => notes.push(format!("pending {} on restart", action)),
    }
    notes.join(", ")
}

pub fn status(controller: &Arc<PluginController>, args: StatusArgs) -> anyhow::Result<()> {
    let Some(plugin) = controller.plugin(&args.key) else {
        anyhow::bail!("Plugin not found: {}", args.key);
    };

    println!("Plugin: {} ({})", plugin.name(), plugin.key());
    println!("  Version: {}", plugin.version());
    println!("  State: {}", plugin.state());
    if !plugin.descriptor().description.is_empty() {
        println!("  Description: {}", plugin.descriptor().description);
    }
    if let Some(reason) = plugin.unloadable_reason() {
        println!("  Unloadable: {}", reason);
    }
    if !plugin.required_plugins().is_empty() {
        println!("  Requires: {}", plugin.required_plugins().join(", "));
    }
    let dependents = controller.dependents_of(plugin.key());
    if !dependents.is_empty() {
        println!("  Required by: {}", dependents.join(", "));
    }
    let action = controller.restart_action(plugin.key());
    if action != RestartAction::None {
        println!("  Pending on restart: {}", action);
    }

    if !plugin.modules().is_empty() {
        println!("  Modules:");
        for module in plugin.modules() {
            let mut flags = Vec::new();
            if module.requires_restart() {
                flags.push("restart");
            }
            if !module.can_disable() {
                flags.push("locked");
            }
            println!(
                "    {} [{}]{}",
                module.complete_key(),
                if module.is_enabled() { "enabled" } else { "disabled" },
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                }
            );
        }
    }
    Ok(())
}

pub async fn enable(controller: &Arc<PluginController>, args: EnableArgs) -> anyhow::Result<()> {
    let requested = args.keys.clone();
    let enabled = blocking(controller, move |c| {
        let keys: Vec<&str> = requested.iter().map(String::as_str).collect();
        Ok(c.enable_plugins(&keys))
    })
    .await?;

    for key in &args.keys {
        if enabled.contains(key) {
            println!("Enabled {}", key);
        } else {
            println!("Could not enable {}", key);
        }
    }
    for key in enabled.iter().filter(|k| !args.keys.contains(k)) {
        println!("Enabled {} (required)", key);
    }
    Ok(())
}

pub async fn disable(controller: &Arc<PluginController>, args: DisableArgs) -> anyhow::Result<()> {
    let key = args.key.clone();
    if args.transient {
        blocking(controller, move |c| c.disable_plugin_without_persisting(&key)).await?;
        println!("Disabled {} for this session", args.key);
    } else {
        blocking(controller, move |c| c.disable_plugin(&key)).await?;
        println!("Disabled {}", args.key);
    }
    Ok(())
}

pub async fn uninstall(controller: &Arc<PluginController>, args: UninstallArgs) -> anyhow::Result<()> {
    let key = args.key.clone();
    blocking(controller, move |c| c.uninstall(&key)).await?;

    if controller.restart_action(&args.key) == RestartAction::Remove {
        println!("{} will be removed on next restart", args.key);
    } else {
        println!("Uninstalled {}", args.key);
    }
    Ok(())
}

pub async fn install(controller: &Arc<PluginController>, args: InstallArgs) -> anyhow::Result<()> {
    let artifacts = args.artifacts;
    let keys = blocking(controller, move |c| c.install_artifacts(&artifacts)).await?;

    for key in keys {
        match controller.restart_action(&key) {
            RestartAction::None => println!("Installed {}", key),
            action => println!("{} will {} on next restart", key, action),
        }
    }
    Ok(())
}

pub async fn scan(controller: &Arc<PluginController>) -> anyhow::Result<()> {
    let found = blocking(controller, |c| c.scan_for_new_plugins()).await?;
    println!("Found {} new plugins", found);
    Ok(())
}
