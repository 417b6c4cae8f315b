//! Plugin model: descriptors, modules, lifecycle states and the `Plugin` trait.

pub mod basic;
pub mod descriptor;
pub mod module;
pub mod unloadable;

pub use basic::StaticPlugin;
pub use descriptor::{
    complete_key, parse_descriptor, read_descriptor, split_complete_key, ModuleDefinition,
    PluginDescriptor,
};
pub use module::{PluginModule, StateAware};
pub use unloadable::UnloadablePlugin;

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::Result;

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PluginState {
    Installed = 1,
    Enabling = 2,
    Enabled = 3,
    Disabling = 4,
    Disabled = 5,
    Uninstalled = 6,
    Unloadable = 7,
}

impl PluginState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Installed,
            2 => Self::Enabling,
            3 => Self::Enabled,
            4 => Self::Disabling,
            5 => Self::Disabled,
            6 => Self::Uninstalled,
            _ => Self::Unloadable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Uninstalled => "uninstalled",
            Self::Unloadable => "unloadable",
        }
    }

    /// States a plugin never leaves on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Uninstalled | Self::Unloadable)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically readable holder for a plugin's lifecycle state
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: PluginState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> PluginState {
        PluginState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: PluginState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `to` only if the current state is `from`
    pub fn transition(&self, from: PluginState, to: PluginState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A loadable unit managed by the lifecycle controller.
///
/// Implementations own their lifecycle state. `enable` may return while the
/// plugin is still `Enabling`; the enabler waits for it to settle.
pub trait Plugin: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &PluginDescriptor;

    fn modules(&self) -> &[Arc<PluginModule>];

    fn state(&self) -> PluginState;

    fn enable(&self) -> Result<()>;

    fn disable(&self) -> Result<()>;

    /// Notification that the plugin is being removed from the runtime
    fn uninstall(&self) -> Result<()>;

    /// Explanation carried by placeholder plugins
    fn unloadable_reason(&self) -> Option<&str> {
        None
    }

    fn key(&self) -> &str {
        &self.descriptor().key
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn version(&self) -> &Version {
        &self.descriptor().version
    }

    fn required_plugins(&self) -> &[String] {
        &self.descriptor().requires
    }

    fn is_system(&self) -> bool {
        self.descriptor().system
    }

    fn is_uninstallable(&self) -> bool {
        self.descriptor().uninstallable
    }

    fn is_deletable(&self) -> bool {
        self.descriptor().deletable
    }

    fn is_enabled_by_default(&self) -> bool {
        self.descriptor().enabled_by_default
    }

    /// True when any owned module cannot be hot-loaded
    fn requires_restart(&self) -> bool {
        self.modules().iter().any(|m| m.requires_restart())
    }

    fn module(&self, module_key: &str) -> Option<&Arc<PluginModule>> {
        self.modules().iter().find(|m| m.key() == module_key)
    }

    fn requires(&self, plugin_key: &str) -> bool {
        self.required_plugins().iter().any(|k| k == plugin_key)
    }
}
