use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::PluginController;
use crate::events::EventType;
use crate::plugin::{split_complete_key, Plugin, PluginState, UnloadablePlugin};
use crate::state::RestartAction;
use crate::{Error, Result};

impl PluginController {
    /// Register a batch of plugins, upgrading any already present, and enable
    /// those the persisted state wants enabled
    pub(super) fn add_plugins_from(&self, plugins: Vec<(Option<usize>, Arc<dyn Plugin>)>) {
        let mut to_enable: Vec<Arc<dyn Plugin>> = Vec::new();
        let mut upgraded = Vec::new();

        for (loader, plugin) in plugins {
            let key = plugin.key().to_string();
            let lock = self.install_locks.for_key(&key);
            let _guard = lock.lock();

            let existing = self.registry.get(&key);
            if let Some(existing) = &existing {
                if plugin.version() < existing.version() {
                    tracing::debug!(
                        "Ignoring plugin {} {}: version {} is already installed",
                        key,
                        plugin.version(),
                        existing.version()
                    );
                    continue;
                }
            }

            let needs_restart = plugin.requires_restart()
                || existing.as_ref().is_some_and(|e| e.requires_restart());
            if self.is_started() && needs_restart {
                self.defer_until_restart(loader, &plugin, existing.is_some());
                continue;
            }

            match existing {
                Some(existing) => {
                    self.upgrade(&existing, &plugin);
                    upgraded.push(key.clone());
                }
                None => {
                    self.registry.put(Arc::clone(&plugin));
                    tracing::info!("Installed plugin {} {}", key, plugin.version());
                    self.publish(EventType::PluginInstalled, &key);
                }
            }
            self.record_origin(&key, loader);

            if plugin.state() == PluginState::Unloadable {
                continue;
            }
            if self.state().is_plugin_enabled(plugin.as_ref()) {
                to_enable.push(plugin);
            } else if plugin.is_system() {
                tracing::warn!("System plugin {} is disabled", key);
            }
        }

        // A newer version of the same key may have replaced a batch member
        to_enable.retain(|p| self.registry.get(p.key()).is_some_and(|r| Arc::ptr_eq(&r, p)));

        let enabled = self.enabler.enable_all_recursively(&to_enable);
        self.update_state(|state| {
            for plugin in &enabled {
                state.set_plugin_enabled(plugin.as_ref(), true);
            }
        });
        self.notify_plugins_enabled(&enabled);

        for plugin in &to_enable {
            if plugin.is_system() && plugin.state() != PluginState::Enabled {
                tracing::warn!("System plugin {} could not be enabled", plugin.key());
            }
        }
        for key in upgraded {
            self.publish(EventType::PluginUpgraded, &key);
        }
    }

    fn defer_until_restart(&self, loader: Option<usize>, plugin: &Arc<dyn Plugin>, upgrade: bool) {
        let key = plugin.key();
        if upgrade {
            tracing::info!(
                "Plugin {} will be upgraded to {} after restart",
                key,
                plugin.version()
            );
            self.update_state(|state| {
                state.set_restart_state(key, RestartAction::Upgrade);
            });
            return;
        }

        tracing::info!("Plugin {} will be installed after restart", key);
        self.update_state(|state| {
            state.set_restart_state(key, RestartAction::Install);
        });
        let placeholder: Arc<dyn Plugin> = Arc::new(UnloadablePlugin::replacing(
            plugin.as_ref(),
            "installation requires a restart",
        ));
        self.registry.put(placeholder);
        self.record_origin(key, loader);
    }

    /// Replace `existing` with `plugin`, keeping the overrides that still
    /// apply to the new version
    fn upgrade(&self, existing: &Arc<dyn Plugin>, plugin: &Arc<dyn Plugin>) {
        let key = plugin.key();
        tracing::info!(
            "Upgrading plugin {} from {} to {}",
            key,
            existing.version(),
            plugin.version()
        );

        let captured = self.state().plugin_state_map(key);
        self.disable_dependents(key);
        self.unload_plugin(existing);

        let retained: HashMap<String, bool> = captured
            .iter()
            .filter(|(entry, _)| {
                entry.as_str() == key
                    || split_complete_key(entry).is_some_and(|(_, module)| plugin.module(module).is_some())
            })
            .map(|(entry, enabled)| (entry.clone(), *enabled))
            .collect();
        self.update_state(|state| {
            for entry in captured.keys() {
                state.remove_state(entry);
            }
            state.add_overrides(retained);
        });

        self.registry.put(Arc::clone(plugin));
    }

    /// Uninstall a plugin and delete its artifact.
    ///
    /// When the plugin needs a restart, or its installation is itself waiting
    /// for one, only a pending removal is recorded and the plugin stays
    /// registered until the next start.
    pub fn uninstall(&self, key: &str) -> Result<()> {
        let lock = self.install_locks.for_key(key);
        let _guard = lock.lock();

        let plugin = self.registry.get(key).ok_or_else(|| Error::PluginNotFound {
            key: key.to_string(),
        })?;
        if !plugin.is_uninstallable() {
            return Err(Error::NotUninstallable {
                key: key.to_string(),
            });
        }

        let loader = self.loader_for(key);
        if let Some(loader) = &loader {
            if !loader.supports_removal() {
                return Err(Error::RemovalUnsupported {
                    key: key.to_string(),
                    loader: loader.name().to_string(),
                });
            }
        }

        let pending_install = self.state().restart_action(key) == RestartAction::Install;
        if self.is_started() && (plugin.requires_restart() || pending_install) {
            tracing::info!("Plugin {} will be removed after restart", key);
            self.update_state(|state| {
                state.set_restart_state(key, RestartAction::Remove);
            });
            return Ok(());
        }

        self.disable_dependents(key);
        self.unload_plugin(&plugin);
        self.forget_origin(key);

        let removal = match &loader {
            Some(loader) if plugin.is_deletable() => loader.remove_plugin(plugin.as_ref()),
            _ => Ok(()),
        };
        if let Err(e) = &removal {
            tracing::error!("Failed to remove artifact of plugin {}: {}", key, e);
        }

        self.update_state(|state| {
            state.remove_plugin_state(key);
        });
        tracing::info!("Uninstalled plugin {}", key);
        self.publish(EventType::PluginUninstalled, key);
        removal
    }

    /// Enable plugins by key, together with the plugins they require, and
    /// persist the result. Returns the keys that are enabled afterwards.
    pub fn enable_plugins(&self, keys: &[&str]) -> Vec<String> {
        let mut running = Vec::new();
        let mut pending = Vec::new();
        for key in keys {
            match self.registry.get(key) {
                Some(plugin) if plugin.state() == PluginState::Enabled => running.push(plugin),
                Some(plugin) => pending.push(plugin),
                None => tracing::warn!("Cannot enable unknown plugin {}", key),
            }
        }

        let enabled = self.enabler.enable_all_recursively(&pending);
        self.update_state(|state| {
            for plugin in running.iter().chain(&enabled) {
                state.set_plugin_enabled(plugin.as_ref(), true);
            }
        });
        self.notify_plugins_enabled(&enabled);

        running
            .iter()
            .chain(&enabled)
            .filter(|p| p.state() == PluginState::Enabled)
            .map(|p| p.key().to_string())
            .collect()
    }

    /// Disable a plugin and remember the choice
    pub fn disable_plugin(&self, key: &str) -> Result<()> {
        let plugin = self.lookup(key)?;
        self.disable_plugin_internal(&plugin, true)
    }

    /// Disable a plugin for this session only
    pub fn disable_plugin_without_persisting(&self, key: &str) -> Result<()> {
        let plugin = self.lookup(key)?;
        self.disable_plugin_internal(&plugin, false)
    }

    fn lookup(&self, key: &str) -> Result<Arc<dyn Plugin>> {
        self.registry.get(key).ok_or_else(|| Error::PluginNotFound {
            key: key.to_string(),
        })
    }

    pub(super) fn disable_plugin_internal(&self, plugin: &Arc<dyn Plugin>, persist: bool) -> Result<()> {
        if persist {
            self.update_state(|state| {
                state.set_plugin_enabled(plugin.as_ref(), false);
            });
        }

        if !matches!(plugin.state(), PluginState::Enabled | PluginState::Enabling) {
            return Ok(());
        }
        if plugin.is_system() {
            tracing::warn!("Disabling system plugin {}", plugin.key());
        }

        self.disable_modules(plugin);
        plugin.disable()?;
        tracing::info!("Disabled plugin {}", plugin.key());
        self.publish(EventType::PluginDisabled, plugin.key());
        Ok(())
    }

    /// Disable, without persisting, every plugin that directly or
    /// transitively requires `key`
    pub(super) fn disable_dependents(&self, key: &str) {
        let mut visited = HashSet::from([key.to_string()]);
        let mut queue = vec![key.to_string()];

        while let Some(current) = queue.pop() {
            for dependent in self.registry.values() {
                if !dependent.requires(&current) || !visited.insert(dependent.key().to_string()) {
                    continue;
                }
                if matches!(dependent.state(), PluginState::Enabled | PluginState::Enabling) {
                    tracing::info!(
                        "Disabling plugin {} because it requires {}",
                        dependent.key(),
                        current
                    );
                    if let Err(e) = self.disable_plugin_internal(&dependent, false) {
                        tracing::warn!("Failed to disable plugin {}: {}", dependent.key(), e);
                    }
                }
                queue.push(dependent.key().to_string());
            }
        }
    }

    /// Stop and unregister a plugin; persisted state is left alone
    fn unload_plugin(&self, plugin: &Arc<dyn Plugin>) {
        if let Err(e) = self.disable_plugin_internal(plugin, false) {
            tracing::warn!("Failed to disable plugin {}: {}", plugin.key(), e);
        }
        if let Err(e) = plugin.uninstall() {
            tracing::warn!("Failed to uninstall plugin {}: {}", plugin.key(), e);
        }
        self.registry.remove(plugin.key());
    }
}
