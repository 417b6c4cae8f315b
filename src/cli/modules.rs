//! Module-level commands.

use clap::Args;
use std::sync::Arc;

use super::blocking;
use crate::controller::PluginController;

/// Arguments for the enable-module and disable-module commands
#[derive(Args)]
pub struct ModuleArgs {
    /// Complete module key (`plugin:module`)
    pub complete_key: String,
}

pub async fn enable(controller: &Arc<PluginController>, args: ModuleArgs) -> anyhow::Result<()> {
    let key = args.complete_key.clone();
    blocking(controller, move |c| c.enable_plugin_module(&key)).await?;

    if controller.is_plugin_module_enabled(&args.complete_key) {
        println!("Enabled module {}", args.complete_key);
    } else {
        println!("Module {} will start when its plugin is enabled", args.complete_key);
    }
    Ok(())
}

pub async fn disable(controller: &Arc<PluginController>, args: ModuleArgs) -> anyhow::Result<()> {
    let key = args.complete_key.clone();
    blocking(controller, move |c| c.disable_plugin_module(&key)).await?;

    if controller.is_plugin_module_enabled(&args.complete_key) {
        println!("Module {} cannot be disabled", args.complete_key);
    } else {
        println!("Disabled module {}", args.complete_key);
    }
    Ok(())
}
