//! # nova-lifecycle
//!
//! Plugin lifecycle runtime: installs, upgrades, enables, disables and
//! uninstalls plugins and the modules they own.
//!
//! ## Features
//!
//! - **Registry**: lock-free reads of the installed plugin set
//! - **Dependency-aware enabling**: required plugins are enabled first, slow
//!   plugins are waited for within a time budget
//! - **Differential state**: only choices that differ from the declared
//!   defaults are persisted, plus changes deferred to the next restart
//! - **Fault containment**: a module that fails to start turns its plugin into
//!   an unloadable placeholder instead of taking the system down
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nova_lifecycle::{EnablerConfig, EventBus, MemoryStateStore, PluginController};
//! use nova_lifecycle::plugin::{PluginDescriptor, StaticPlugin};
//! use std::sync::Arc;
//!
//! # fn main() -> nova_lifecycle::Result<()> {
//! let controller = PluginController::new(
//!     EnablerConfig::default(),
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(EventBus::new()),
//! );
//! controller.init()?;
//!
//! let descriptor = PluginDescriptor::new("hello", semver::Version::new(1, 0, 0));
//! controller.install_plugin(Arc::new(StaticPlugin::new(descriptor)));
//! assert!(controller.is_plugin_enabled("hello"));
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod controller;
pub mod enabler;
pub mod error;
pub mod events;
pub mod installer;
pub mod loader;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod state;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{EnablerConfig, RuntimeConfig};
pub use controller::PluginController;
pub use error::{Error, Result};
pub use events::{EventBus, EventType, LifecycleEvent};
pub use installer::{DirectoryInstaller, PluginInstaller};
pub use loader::{DirectoryPluginLoader, PluginLoader, StaticPluginLoader};
pub use plugin::{Plugin, PluginState};
pub use registry::PluginRegistry;
pub use state::{JsonFileStateStore, MemoryStateStore, PluginPersistentState, RestartAction};

/// Version of the runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
