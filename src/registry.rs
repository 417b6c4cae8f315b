use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::Plugin;

type PluginMap = HashMap<String, Arc<dyn Plugin>>;

/// Registry of installed plugins, keyed by plugin key.
///
/// Every write swaps in a new map, so readers always iterate a complete
/// snapshot while a lifecycle operation is updating entries.
pub struct PluginRegistry {
    plugins: ArcSwap<PluginMap>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Register a plugin, returning the one it replaced
    pub fn put(&self, plugin: Arc<dyn Plugin>) -> Option<Arc<dyn Plugin>> {
        let key = plugin.key().to_string();
        let previous = self.plugins.load().get(&key).cloned();
        self.plugins.rcu(|current| {
            let mut next = PluginMap::clone(current);
            next.insert(key.clone(), Arc::clone(&plugin));
            next
        });
        previous
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.load().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.plugins.load().contains_key(key)
    }

    /// Unregister a plugin by key
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        let removed = self.plugins.load().get(key).cloned();
        if removed.is_some() {
            self.plugins.rcu(|current| {
                let mut next = PluginMap::clone(current);
                next.remove(key);
                next
            });
        }
        removed
    }

    /// Replace `expected` with `replacement` only if it is still registered
    pub fn replace(&self, expected: &Arc<dyn Plugin>, replacement: Arc<dyn Plugin>) -> bool {
        let key = expected.key().to_string();
        let mut replaced = false;
        self.plugins.rcu(|current| {
            let mut next = PluginMap::clone(current);
            replaced = match next.get(&key) {
                Some(existing) if Arc::ptr_eq(existing, expected) => {
                    next.insert(key.clone(), Arc::clone(&replacement));
                    true
                }
                _ => false,
            };
            next
        });
        replaced
    }

    /// Snapshot of all registered plugins
    pub fn values(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.load().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.plugins.load().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.load().is_empty()
    }

    pub fn clear(&self) {
        self.plugins.store(Arc::new(HashMap::new()));
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.keys())
            .finish()
    }
}
