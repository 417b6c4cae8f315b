use std::sync::Arc;

use super::{Plugin, PluginDescriptor, PluginModule, PluginState, StateCell};
use crate::{Error, Result};

/// Non-functional stand-in registered in place of a plugin that cannot run.
///
/// Keeps the original descriptor so the plugin still shows up in listings and
/// can be uninstalled when its flags allow it. Owns no modules.
#[derive(Debug)]
pub struct UnloadablePlugin {
    descriptor: PluginDescriptor,
    reason: String,
    state: StateCell,
}

impl UnloadablePlugin {
    pub fn new(descriptor: PluginDescriptor, reason: impl Into<String>) -> Self {
        Self {
            descriptor,
            reason: reason.into(),
            state: StateCell::new(PluginState::Unloadable),
        }
    }

    /// Placeholder for `plugin`, keeping its identity and removal flags
    pub fn replacing(plugin: &dyn Plugin, reason: impl Into<String>) -> Self {
        Self::new(plugin.descriptor().clone(), reason)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Plugin for UnloadablePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn modules(&self) -> &[Arc<PluginModule>] {
        &[]
    }

    fn state(&self) -> PluginState {
        self.state.get()
    }

    fn enable(&self) -> Result<()> {
        Err(Error::transition(self.key(), "enable", &self.reason))
    }

    fn disable(&self) -> Result<()> {
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.state.set(PluginState::Uninstalled);
        Ok(())
    }

    fn unloadable_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }
}
