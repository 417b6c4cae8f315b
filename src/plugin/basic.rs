use std::sync::Arc;

use super::{Plugin, PluginDescriptor, PluginModule, PluginState, StateAware, StateCell};
use crate::{Error, Result};

/// Plugin built straight from a descriptor whose transitions complete synchronously
#[derive(Debug)]
pub struct StaticPlugin {
    descriptor: PluginDescriptor,
    modules: Vec<Arc<PluginModule>>,
    state: StateCell,
}

impl StaticPlugin {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        let modules = descriptor
            .modules
            .iter()
            .map(|definition| Arc::new(PluginModule::new(&descriptor.key, definition.clone())))
            .collect();

        Self {
            descriptor,
            modules,
            state: StateCell::new(PluginState::Installed),
        }
    }

    /// Attach enable/disable hooks to one of the declared modules
    pub fn with_state_aware(mut self, module_key: &str, handler: Arc<dyn StateAware>) -> Self {
        if let Some(definition) = self
            .descriptor
            .modules
            .iter()
            .find(|m| m.key == module_key)
        {
            let module = PluginModule::new(&self.descriptor.key, definition.clone())
                .with_state_aware(handler);
            if let Some(slot) = self.modules.iter_mut().find(|m| m.key() == module_key) {
                *slot = Arc::new(module);
            }
        }
        self
    }
}

impl Plugin for StaticPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn modules(&self) -> &[Arc<PluginModule>] {
        &self.modules
    }

    fn state(&self) -> PluginState {
        self.state.get()
    }

    fn enable(&self) -> Result<()> {
        let current = self.state.get();
        if current == PluginState::Enabled {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(Error::transition(
                self.key(),
                "enable",
                format!("plugin is {}", current),
            ));
        }

        self.state.set(PluginState::Enabling);
        self.state.set(PluginState::Enabled);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        let current = self.state.get();
        if current.is_terminal() || current == PluginState::Disabled {
            return Ok(());
        }

        self.state.set(PluginState::Disabling);
        self.state.set(PluginState::Disabled);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.state.set(PluginState::Uninstalled);
        Ok(())
    }
}
