use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use super::PluginPersistentState;
use crate::Result;

/// Durable home of the persistent state snapshot
pub trait PluginStateStore: Send + Sync {
    fn load(&self) -> Result<PluginPersistentState>;

    fn save(&self, state: &PluginPersistentState) -> Result<()>;
}

/// Keeps the snapshot in memory only
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PluginPersistentState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PluginPersistentState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Last saved snapshot
    pub fn current(&self) -> PluginPersistentState {
        self.state.lock().clone()
    }
}

impl PluginStateStore for MemoryStateStore {
    fn load(&self) -> Result<PluginPersistentState> {
        Ok(self.current())
    }

    fn save(&self, state: &PluginPersistentState) -> Result<()> {
        *self.state.lock() = state.clone();
        Ok(())
    }
}

/// Stores the snapshot as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PluginStateStore for JsonFileStateStore {
    fn load(&self) -> Result<PluginPersistentState> {
        if !self.path.exists() {
            tracing::debug!("No plugin state at {:?}, starting from defaults", self.path);
            return Ok(PluginPersistentState::default());
        }

        let content = fs::read_to_string(&self.path)?;
        let state: PluginPersistentState = serde_json::from_str(&content)?;

        tracing::info!("Loaded plugin state from {:?}", self.path);
        Ok(state)
    }

    fn save(&self, state: &PluginPersistentState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content)?;

        tracing::debug!("Saved plugin state to {:?}", self.path);
        Ok(())
    }
}
