use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::descriptor::{complete_key, ModuleDefinition};

/// Capability of modules that want to react to being switched on and off
pub trait StateAware: Send + Sync {
    fn on_enable(&self) -> anyhow::Result<()>;

    fn on_disable(&self) -> anyhow::Result<()>;
}

/// Runtime instance of a module owned by a plugin
pub struct PluginModule {
    plugin_key: String,
    complete_key: String,
    definition: ModuleDefinition,
    enabled: AtomicBool,
    state_aware: Option<Arc<dyn StateAware>>,
}

impl PluginModule {
    pub fn new(plugin_key: &str, definition: ModuleDefinition) -> Self {
        Self {
            plugin_key: plugin_key.to_string(),
            complete_key: complete_key(plugin_key, &definition.key),
            definition,
            enabled: AtomicBool::new(false),
            state_aware: None,
        }
    }

    pub fn with_state_aware(mut self, handler: Arc<dyn StateAware>) -> Self {
        self.state_aware = Some(handler);
        self
    }

    pub fn key(&self) -> &str {
        &self.definition.key
    }

    pub fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    pub fn complete_key(&self) -> &str {
        &self.complete_key
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn is_enabled_by_default(&self) -> bool {
        self.definition.enabled_by_default
    }

    pub fn requires_restart(&self) -> bool {
        self.definition.requires_restart
    }

    pub fn can_disable(&self) -> bool {
        self.definition.can_disable
    }

    /// Whether the module is currently switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The enable/disable hooks, when the module has them
    pub fn state_aware(&self) -> Option<&Arc<dyn StateAware>> {
        self.state_aware.as_ref()
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("complete_key", &self.complete_key)
            .field("enabled", &self.is_enabled())
            .field("state_aware", &self.state_aware.is_some())
            .finish()
    }
}
