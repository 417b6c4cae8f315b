use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::PluginLoader;
use crate::plugin::{read_descriptor, Plugin, PluginDescriptor, StaticPlugin};
use crate::{Error, Result};

/// Extension of plugin descriptor files
pub const DESCRIPTOR_EXTENSION: &str = "toml";

/// Loads plugins from `*.toml` descriptors in a single directory
pub struct DirectoryPluginLoader {
    dir: PathBuf,
    seen: Mutex<HashMap<PathBuf, PluginDescriptor>>,
}

impl DirectoryPluginLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(&self) -> Result<Vec<(PathBuf, PluginDescriptor)>> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXTENSION)
            {
                continue;
            }

            match read_descriptor(path) {
                Ok(descriptor) => found.push((path.to_path_buf(), descriptor)),
                Err(e) => tracing::error!("Skipping plugin descriptor {:?}: {}", path, e),
            }
        }

        Ok(found)
    }

    fn into_plugin(descriptor: PluginDescriptor) -> Arc<dyn Plugin> {
        Arc::new(StaticPlugin::new(descriptor))
    }
}

impl PluginLoader for DirectoryPluginLoader {
    fn name(&self) -> &str {
        "directory"
    }

    fn load_all_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        let scanned = self.scan()?;
        let mut seen = self.seen.lock();
        seen.clear();

        let plugins = scanned
            .into_iter()
            .map(|(path, descriptor)| {
                seen.insert(path, descriptor.clone());
                Self::into_plugin(descriptor)
            })
            .collect::<Vec<_>>();

        tracing::info!("Found {} plugins in {:?}", plugins.len(), self.dir);
        Ok(plugins)
    }

    fn load_found_plugins(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        let scanned = self.scan()?;
        let mut seen = self.seen.lock();

        let mut plugins = Vec::new();
        for (path, descriptor) in scanned {
            if seen.get(&path) == Some(&descriptor) {
                continue;
            }
            seen.insert(path, descriptor.clone());
            plugins.push(Self::into_plugin(descriptor));
        }

        Ok(plugins)
    }

    fn supports_addition(&self) -> bool {
        true
    }

    fn supports_removal(&self) -> bool {
        true
    }

    fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        let mut seen = self.seen.lock();
        let path = seen
            .iter()
            .find(|(_, descriptor)| descriptor.key == plugin.key())
            .map(|(path, _)| path.clone())
            .ok_or_else(|| Error::PluginNotFound {
                key: plugin.key().to_string(),
            })?;

        if path.exists() {
            fs::remove_file(&path)?;
        }
        seen.remove(&path);

        tracing::info!("Removed plugin descriptor {:?}", path);
        Ok(())
    }
}
