use std::collections::HashSet;
use std::sync::Arc;

use super::PluginController;
use crate::events::{EventType, LifecycleEvent};
use crate::plugin::{split_complete_key, Plugin, PluginModule, PluginState, UnloadablePlugin};
use crate::{Error, Result};

impl PluginController {
    /// Enable a module and remember the choice. The module only starts when
    /// its plugin is enabled.
    pub fn enable_plugin_module(&self, complete_key: &str) -> Result<()> {
        let (plugin, module) = self.resolve_module(complete_key)?;
        self.update_state(|state| {
            state.set_module_enabled(&module, true);
        });

        if plugin.state() != PluginState::Enabled || module.is_enabled() {
            return Ok(());
        }
        if let Err(e) = self.enable_module(&module) {
            let running = self.enabled_modules(plugin.key());
            self.contain_module_fault(&plugin, &running, &module, e);
        }
        Ok(())
    }

    /// Disable a module and remember the choice. Locked modules are left
    /// untouched.
    pub fn disable_plugin_module(&self, complete_key: &str) -> Result<()> {
        let (_, module) = self.resolve_module(complete_key)?;
        if !module.can_disable() {
            tracing::warn!("Module {} cannot be disabled", complete_key);
            return Ok(());
        }

        self.update_state(|state| {
            state.set_module_enabled(&module, false);
        });
        if module.is_enabled() {
            self.disable_module(&module);
        }
        Ok(())
    }

    /// Stop and restart the modules of every enabled plugin without touching
    /// the plugins themselves
    pub fn warm_restart(&self) {
        tracing::info!("Warm restarting plugin modules");
        self.events
            .publish_quietly(LifecycleEvent::framework(EventType::FrameworkWarmRestarting));

        let restarting: Vec<Arc<dyn Plugin>> = self
            .plugins_in_order()
            .into_iter()
            .filter(|p| p.state() == PluginState::Enabled)
            .collect();

        for plugin in &restarting {
            self.disable_modules(plugin);
        }
        for plugin in restarting.iter().rev() {
            if plugin.state() == PluginState::Enabled {
                self.enable_configured_modules(plugin);
            }
        }

        self.events
            .publish_quietly(LifecycleEvent::framework(EventType::FrameworkWarmRestarted));
    }

    fn resolve_module(&self, complete_key: &str) -> Result<(Arc<dyn Plugin>, Arc<PluginModule>)> {
        let not_found = || Error::ModuleNotFound {
            complete_key: complete_key.to_string(),
        };

        let (plugin_key, module_key) = split_complete_key(complete_key).ok_or_else(not_found)?;
        let plugin = self.registry.get(plugin_key).ok_or_else(|| Error::PluginNotFound {
            key: plugin_key.to_string(),
        })?;
        let module = plugin.module(module_key).cloned().ok_or_else(not_found)?;
        Ok((plugin, module))
    }

    /// Start the modules of freshly enabled plugins, requirements before the
    /// plugins that need them. Members of a requirement cycle go together.
    pub(super) fn notify_plugins_enabled(&self, enabled: &[Arc<dyn Plugin>]) {
        let mut remaining = enabled.to_vec();
        while !remaining.is_empty() {
            let waiting: HashSet<String> = remaining.iter().map(|p| p.key().to_string()).collect();
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|p| {
                p.required_plugins()
                    .iter()
                    .all(|r| r == p.key() || !waiting.contains(r))
            });
            let (ready, blocked) = if ready.is_empty() {
                (blocked, Vec::new())
            } else {
                (ready, blocked)
            };

            for plugin in &ready {
                self.notify_plugin_enabled(plugin);
            }
            remaining = blocked;
        }
    }

    /// Start the plugin's modules and announce the plugin as enabled
    fn notify_plugin_enabled(&self, plugin: &Arc<dyn Plugin>) {
        if plugin.state() != PluginState::Enabled {
            return;
        }
        if let Some(missing) = self.unmet_requirement(plugin.as_ref()) {
            tracing::warn!(
                "Plugin {} requires {}, which is not enabled; disabling it",
                plugin.key(),
                missing
            );
            if let Err(e) = self.disable_plugin_internal(plugin, false) {
                tracing::warn!("Failed to disable plugin {}: {}", plugin.key(), e);
            }
            return;
        }

        if self.enable_configured_modules(plugin) {
            tracing::info!("Enabled plugin {}", plugin.key());
            self.publish(EventType::PluginEnabled, plugin.key());
        }
    }

    fn unmet_requirement<'a>(&self, plugin: &'a dyn Plugin) -> Option<&'a str> {
        plugin
            .required_plugins()
            .iter()
            .find(|r| {
                !self
                    .registry
                    .get(r.as_str())
                    .is_some_and(|required| required.state() == PluginState::Enabled)
            })
            .map(String::as_str)
    }

    /// Start every module the persisted state enables, in declaration order.
    /// Returns false when a module failed and the plugin was replaced.
    fn enable_configured_modules(&self, plugin: &Arc<dyn Plugin>) -> bool {
        let state = self.state();
        let mut started: Vec<Arc<PluginModule>> = Vec::new();

        for module in plugin.modules() {
            if module.is_enabled() {
                continue;
            }
            if !state.is_module_enabled(Some(module.as_ref())) {
                tracing::debug!("Module {} is disabled, not starting it", module.complete_key());
                continue;
            }

            if let Err(e) = self.enable_module(module) {
                self.contain_module_fault(plugin, &started, module, e);
                return false;
            }
            started.push(Arc::clone(module));
        }
        true
    }

    fn enable_module(&self, module: &PluginModule) -> anyhow::Result<()> {
        if let Some(hooks) = module.state_aware() {
            hooks.on_enable()?;
        }
        module.mark_enabled(true);
        self.events
            .publish_quietly(LifecycleEvent::module(EventType::ModuleEnabled, module.complete_key()));
        Ok(())
    }

    pub(super) fn disable_module(&self, module: &PluginModule) {
        if let Some(hooks) = module.state_aware() {
            if let Err(e) = hooks.on_disable() {
                tracing::warn!("Error disabling module {}: {:#}", module.complete_key(), e);
            }
        }
        module.mark_enabled(false);
        self.events
            .publish_quietly(LifecycleEvent::module(EventType::ModuleDisabled, module.complete_key()));
    }

    /// Stop running modules in reverse declaration order
    pub(super) fn disable_modules(&self, plugin: &Arc<dyn Plugin>) {
        for module in plugin.modules().iter().rev() {
            if module.is_enabled() {
                self.disable_module(module);
            }
        }
    }

    /// Roll back `started` in reverse order and swap the plugin for an
    /// unloadable placeholder. Persisted state is not touched.
    fn contain_module_fault(
        &self,
        plugin: &Arc<dyn Plugin>,
        started: &[Arc<PluginModule>],
        failed: &PluginModule,
        error: anyhow::Error,
    ) {
        let fault = Error::module_fault(failed.complete_key(), format!("{:#}", error));
        tracing::error!("{}; disabling plugin {}", fault, plugin.key());

        for module in started.iter().rev() {
            self.disable_module(module);
        }
        if let Err(e) = plugin.disable() {
            tracing::warn!("Failed to disable plugin {}: {}", plugin.key(), e);
        }

        let placeholder: Arc<dyn Plugin> =
            Arc::new(UnloadablePlugin::replacing(plugin.as_ref(), fault.to_string()));
        if self.registry.replace(plugin, placeholder) {
            self.publish(EventType::PluginUnloadable, plugin.key());
            self.disable_dependents(plugin.key());
        } else {
            tracing::debug!("Plugin {} was replaced while containing a module fault", plugin.key());
        }
    }
}
