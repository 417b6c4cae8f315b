//! Plugin loaders: the sources plugins come from.

pub mod directory;

pub use directory::DirectoryPluginLoader;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::plugin::Plugin;
use crate::{Error, Result};

/// Supplies plugins to the controller and owns their backing artifacts
pub trait PluginLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Every plugin this loader can currently supply
    fn load_all_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>>;

    /// Plugins that appeared or changed since the last load
    fn load_found_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        Ok(Vec::new())
    }

    fn supports_addition(&self) -> bool {
        false
    }

    fn supports_removal(&self) -> bool {
        false
    }

    /// Physically remove the plugin's backing artifact
    fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        Err(Error::RemovalUnsupported {
            key: plugin.key().to_string(),
            loader: self.name().to_string(),
        })
    }
}

/// Loader over an in-memory list of plugins
pub struct StaticPluginLoader {
    name: String,
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    found: Mutex<Vec<Arc<dyn Plugin>>>,
    removable: bool,
    removed: Mutex<Vec<String>>,
}

impl StaticPluginLoader {
    pub fn new(name: impl Into<String>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            name: name.into(),
            plugins: Mutex::new(plugins),
            found: Mutex::new(Vec::new()),
            removable: false,
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn removable(mut self) -> Self {
        self.removable = true;
        self
    }

    /// Queue a plugin to be reported by the next scan
    pub fn add_found(&self, plugin: Arc<dyn Plugin>) {
        self.found.lock().push(plugin);
    }

    /// Keys of plugins removed through this loader
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

impl PluginLoader for StaticPluginLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_all_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        Ok(self.plugins.lock().clone())
    }

    fn load_found_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        let found: Vec<Arc<dyn Plugin>> = self.found.lock().drain(..).collect();
        let mut plugins = self.plugins.lock();
        for plugin in &found {
            plugins.retain(|p| p.key() != plugin.key());
            plugins.push(Arc::clone(plugin));
        }
        Ok(found)
    }

    fn supports_addition(&self) -> bool {
        true
    }

    fn supports_removal(&self) -> bool {
        self.removable
    }

    fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        if !self.removable {
            return Err(Error::RemovalUnsupported {
                key: plugin.key().to_string(),
                loader: self.name.clone(),
            });
        }
        self.plugins.lock().retain(|p| p.key() != plugin.key());
        self.removed.lock().push(plugin.key().to_string());
        Ok(())
    }
}
