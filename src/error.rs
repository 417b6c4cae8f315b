//! Error types for the lifecycle runtime

use thiserror::Error;

/// Main error type for lifecycle operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Directory walk error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("Invalid plugin descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("Plugin not found: {key}")]
    PluginNotFound { key: String },

    #[error("Module not found: {complete_key}")]
    ModuleNotFound { complete_key: String },

    #[error("Plugin {key} cannot be uninstalled")]
    NotUninstallable { key: String },

    #[error("Loader {loader} does not support removal of plugin {key}")]
    RemovalUnsupported { key: String, loader: String },

    #[error("Operation not supported: {reason}")]
    Unsupported { reason: String },

    #[error("Plugin {key} failed to {action}: {reason}")]
    Transition {
        key: String,
        action: &'static str,
        reason: String,
    },

    #[error("Module {complete_key} failed: {reason}")]
    ModuleFault { complete_key: String, reason: String },

    #[error("Event handler failed for {event_type}: {reason}")]
    EventHandler { event_type: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },
}

impl Error {
    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    pub fn transition(key: impl Into<String>, action: &'static str, reason: impl ToString) -> Self {
        Self::Transition {
            key: key.into(),
            action,
            reason: reason.to_string(),
        }
    }

    pub fn module_fault(complete_key: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModuleFault {
            complete_key: complete_key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;
