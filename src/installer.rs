//! Placing plugin artifacts where a loader will find them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::plugin::{read_descriptor, PluginDescriptor};
use crate::{Error, Result};

/// A plugin artifact on disk, not yet installed
#[derive(Debug, Clone)]
pub struct PluginArtifact {
    path: PathBuf,
}

impl PluginArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn descriptor(&self) -> Result<PluginDescriptor> {
        read_descriptor(&self.path)
    }
}

/// Installs artifacts; implementations may keep backups so that a change
/// awaiting restart can be reverted
pub trait PluginInstaller: Send + Sync {
    fn install_plugin(&self, key: &str, artifact: &PluginArtifact) -> Result<()>;

    fn supports_revert(&self) -> bool {
        false
    }

    /// Restore whatever was in place before the last install of `key`
    fn revert_installed_plugin(&self, key: &str) -> Result<()> {
        Err(Error::Unsupported {
            reason: format!("installer cannot revert plugin {}", key),
        })
    }

    /// Forget every backup taken so far
    fn clear_backups(&self) -> Result<()> {
        Ok(())
    }
}

/// Installer used when none is configured
#[derive(Debug, Default)]
pub struct UnsupportedInstaller;

impl PluginInstaller for UnsupportedInstaller {
    fn install_plugin(&self, key: &str, _artifact: &PluginArtifact) -> Result<()> {
        Err(Error::Unsupported {
            reason: format!("no installer configured to install plugin {}", key),
        })
    }
}

#[derive(Debug, Clone)]
struct Backup {
    installed: PathBuf,
    previous: Option<PathBuf>,
}

/// Copies artifacts into a plugin directory as `<key>.toml`, backing up any
/// descriptor it overwrites
pub struct DirectoryInstaller {
    dir: PathBuf,
    backups: Mutex<HashMap<String, Backup>>,
}

impl DirectoryInstaller {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backups: Mutex::new(HashMap::new()),
        }
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.join(".backups")
    }

    fn target(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", key))
    }
}

impl PluginInstaller for DirectoryInstaller {
    fn install_plugin(&self, key: &str, artifact: &PluginArtifact) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.target(key);

        let mut backups = self.backups.lock();
        let previous = if target.exists() && !backups.contains_key(key) {
            let backup_dir = self.backup_dir();
            fs::create_dir_all(&backup_dir)?;
            let backup = backup_dir.join(format!("{}.toml.bak", key));
            fs::copy(&target, &backup)?;
            Some(backup)
        } else {
            backups.get(key).and_then(|b| b.previous.clone())
        };

        fs::copy(artifact.path(), &target)?;
        backups.insert(
            key.to_string(),
            Backup {
                installed: target.clone(),
                previous,
            },
        );

        tracing::info!("Installed {} as {:?}", artifact.name(), target);
        Ok(())
    }

    fn supports_revert(&self) -> bool {
        true
    }

    fn revert_installed_plugin(&self, key: &str) -> Result<()> {
        let backup = self
            .backups
            .lock()
            .remove(key)
            .ok_or_else(|| Error::Unsupported {
                reason: format!("no backup recorded for plugin {}", key),
            })?;

        match &backup.previous {
            Some(previous) => {
                fs::copy(previous, &backup.installed)?;
                fs::remove_file(previous)?;
                tracing::info!("Restored previous version of plugin {}", key);
            }
            None => {
                if backup.installed.exists() {
                    fs::remove_file(&backup.installed)?;
                }
                tracing::info!("Removed newly installed plugin {}", key);
            }
        }
        Ok(())
    }

    fn clear_backups(&self) -> Result<()> {
        let mut backups = self.backups.lock();
        for backup in backups.values() {
            if let Some(previous) = &backup.previous {
                if previous.exists() {
                    fs::remove_file(previous)?;
                }
            }
        }
        backups.clear();
        Ok(())
    }
}
