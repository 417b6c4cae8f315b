//! Differential persistent state.
//!
//! A [`PluginPersistentState`] records only the enable/disable decisions that
//! differ from a plugin's or module's declared default, plus restart actions
//! deferred to the next process start. Snapshots are immutable; every change
//! goes through a [`StateBuilder`] that produces the next snapshot.

pub mod store;

pub use store::{JsonFileStateStore, MemoryStateStore, PluginStateStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::plugin::{descriptor::KEY_SEPARATOR, Plugin, PluginModule};

/// Lifecycle change deferred until the next full start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestartAction {
    #[default]
    None,
    Install,
    Upgrade,
    Remove,
}

impl fmt::Display for RestartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Remove => "remove",
        };
        f.write_str(label)
    }
}

/// Immutable record of enablement overrides and pending restart actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginPersistentState {
    #[serde(default)]
    enabled: HashMap<String, bool>,
    #[serde(default)]
    restart: HashMap<String, RestartAction>,
}

impl PluginPersistentState {
    pub fn builder() -> StateBuilder {
        StateBuilder::default()
    }

    /// Builder seeded with a copy of this snapshot
    pub fn to_builder(&self) -> StateBuilder {
        StateBuilder {
            enabled: self.enabled.clone(),
            restart: self.restart.clone(),
        }
    }

    /// Override for `plugin`, falling back to its declared default
    pub fn is_plugin_enabled(&self, plugin: &dyn Plugin) -> bool {
        self.enabled
            .get(plugin.key())
            .copied()
            .unwrap_or_else(|| plugin.is_enabled_by_default())
    }

    /// Override for `module`, falling back to its declared default
    pub fn is_module_enabled(&self, module: Option<&PluginModule>) -> bool {
        match module {
            Some(module) => self
                .enabled
                .get(module.complete_key())
                .copied()
                .unwrap_or_else(|| module.is_enabled_by_default()),
            None => false,
        }
    }

    pub fn override_for(&self, key: &str) -> Option<bool> {
        self.enabled.get(key).copied()
    }

    /// Every override belonging to `plugin_key`: the plugin entry itself and
    /// its modules' complete keys
    pub fn plugin_state_map(&self, plugin_key: &str) -> HashMap<String, bool> {
        self.enabled
            .iter()
            .filter(|(key, _)| belongs_to(key, plugin_key))
            .map(|(key, enabled)| (key.clone(), *enabled))
            .collect()
    }

    pub fn restart_action(&self, plugin_key: &str) -> RestartAction {
        self.restart
            .get(plugin_key)
            .copied()
            .unwrap_or(RestartAction::None)
    }

    pub fn overrides(&self) -> &HashMap<String, bool> {
        &self.enabled
    }

    pub fn restart_actions(&self) -> &HashMap<String, RestartAction> {
        &self.restart
    }

    pub fn has_pending_restart(&self) -> bool {
        !self.restart.is_empty()
    }
}

fn belongs_to(key: &str, plugin_key: &str) -> bool {
    match key.strip_prefix(plugin_key) {
        Some("") => true,
        Some(rest) => rest.starts_with(KEY_SEPARATOR),
        None => false,
    }
}

/// Produces the next [`PluginPersistentState`] snapshot
#[derive(Debug, Clone, Default)]
pub struct StateBuilder {
    enabled: HashMap<String, bool>,
    restart: HashMap<String, RestartAction>,
}

impl StateBuilder {
    /// Record an explicit override for a plugin key or module complete key
    pub fn set_enabled(&mut self, key: impl Into<String>, enabled: bool) -> &mut Self {
        self.enabled.insert(key.into(), enabled);
        self
    }

    /// Record the plugin's state, storing it only when it differs from the default
    pub fn set_plugin_enabled(&mut self, plugin: &dyn Plugin, enabled: bool) -> &mut Self {
        self.set_differential(plugin.key(), plugin.is_enabled_by_default(), enabled)
    }

    /// Record the module's state, storing it only when it differs from the default
    pub fn set_module_enabled(&mut self, module: &PluginModule, enabled: bool) -> &mut Self {
        self.set_differential(module.complete_key(), module.is_enabled_by_default(), enabled)
    }

    fn set_differential(&mut self, key: &str, default: bool, enabled: bool) -> &mut Self {
        if enabled == default {
            self.enabled.remove(key);
        } else {
            self.enabled.insert(key.to_string(), enabled);
        }
        self
    }

    /// Drop an override so the entity reverts to its default
    pub fn remove_state(&mut self, key: &str) -> &mut Self {
        self.enabled.remove(key);
        self
    }

    /// Drop every override belonging to a plugin and its modules
    pub fn remove_plugin_state(&mut self, plugin_key: &str) -> &mut Self {
        self.enabled.retain(|key, _| !belongs_to(key, plugin_key));
        self.restart.remove(plugin_key);
        self
    }

    pub fn set_restart_state(&mut self, plugin_key: &str, action: RestartAction) -> &mut Self {
        if action == RestartAction::None {
            self.restart.remove(plugin_key);
        } else {
            self.restart.insert(plugin_key.to_string(), action);
        }
        self
    }

    pub fn clear_all_restart_state(&mut self) -> &mut Self {
        self.restart.clear();
        self
    }

    /// Merge overrides in bulk, replacing existing values for the same keys
    pub fn add_overrides(&mut self, overrides: HashMap<String, bool>) -> &mut Self {
        self.enabled.extend(overrides);
        self
    }

    pub fn build(&self) -> PluginPersistentState {
        PluginPersistentState {
            enabled: self.enabled.clone(),
            restart: self.restart.clone(),
        }
    }
}
