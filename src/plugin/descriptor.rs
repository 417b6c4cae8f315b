use serde::{Deserialize, Serialize};
use semver::Version;
use std::collections::HashSet;
use std::path::Path;

use crate::{Error, Result};

/// Separator between a plugin key and a module key in a complete key
pub const KEY_SEPARATOR: char = ':';

/// Plugin descriptor parsed from a `*.toml` plugin file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub system: bool,
    #[serde(default = "default_true")]
    pub uninstallable: bool,
    #[serde(default = "default_true")]
    pub deletable: bool,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

/// Static definition of a module owned by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    /// Module cannot be loaded or unloaded without a full restart
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default = "default_true")]
    pub can_disable: bool,
}

fn default_true() -> bool {
    true
}

impl PluginDescriptor {
    pub fn new(key: impl Into<String>, version: Version) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            version,
            description: String::new(),
            requires: Vec::new(),
            system: false,
            uninstallable: true,
            deletable: true,
            enabled_by_default: true,
            modules: Vec::new(),
        }
    }

    pub fn requiring(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }

    pub fn with_module(mut self, module: ModuleDefinition) -> Self {
        self.modules.push(module);
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.uninstallable = false;
        self.deletable = false;
        self
    }

    /// Check the structural rules every descriptor must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::invalid_descriptor("plugin key cannot be empty"));
        }

        if self.key.contains(KEY_SEPARATOR) {
            return Err(Error::invalid_descriptor(format!(
                "plugin key '{}' must not contain '{}'",
                self.key, KEY_SEPARATOR
            )));
        }

        if self.requires.iter().any(|r| r == &self.key) {
            return Err(Error::invalid_descriptor(format!(
                "plugin '{}' cannot require itself",
                self.key
            )));
        }

        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.key.trim().is_empty() {
                return Err(Error::invalid_descriptor(format!(
                    "plugin '{}' declares a module with an empty key",
                    self.key
                )));
            }
            if module.key.contains(KEY_SEPARATOR) {
                return Err(Error::invalid_descriptor(format!(
                    "module key '{}' must not contain '{}'",
                    module.key, KEY_SEPARATOR
                )));
            }
            if !seen.insert(module.key.as_str()) {
                return Err(Error::invalid_descriptor(format!(
                    "plugin '{}' declares module '{}' more than once",
                    self.key, module.key
                )));
            }
        }

        Ok(())
    }

    /// Complete keys of every module declared by this descriptor
    pub fn module_complete_keys(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|m| complete_key(&self.key, &m.key))
            .collect()
    }
}

impl ModuleDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            enabled_by_default: true,
            requires_restart: false,
            can_disable: true,
        }
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn requiring_restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }

    pub fn locked(mut self) -> Self {
        self.can_disable = false;
        self
    }
}

/// Build the `pluginKey:moduleKey` identifier of a module
pub fn complete_key(plugin_key: &str, module_key: &str) -> String {
    format!("{}{}{}", plugin_key, KEY_SEPARATOR, module_key)
}

/// Split a complete key into its plugin and module parts
pub fn split_complete_key(complete_key: &str) -> Option<(&str, &str)> {
    let (plugin, module) = complete_key.split_once(KEY_SEPARATOR)?;
    if plugin.is_empty() || module.is_empty() {
        return None;
    }
    Some((plugin, module))
}

/// Parse plugin descriptor from TOML content
pub fn parse_descriptor(toml_content: &str) -> Result<PluginDescriptor> {
    let descriptor: PluginDescriptor = toml::from_str(toml_content)?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Read and parse a descriptor file
pub fn read_descriptor(path: &Path) -> Result<PluginDescriptor> {
    let content = std::fs::read_to_string(path)?;
    parse_descriptor(&content).map_err(|e| match e {
        Error::TomlParse(inner) => {
            Error::invalid_descriptor(format!("{}: {}", path.display(), inner))
        }
        other => other,
    })
}
