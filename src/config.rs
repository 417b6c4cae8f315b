use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that forces diagnostics mode on
pub const DEV_MODE_ENV: &str = "NOVA_DEV_MODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub enabler: EnablerSettings,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnablerSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub dev_mode: bool,
    pub straggler_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub plugin_dir: PathBuf,
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// Timing parameters of the dependency-aware enabler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnablerConfig {
    /// Global budget for a whole enable batch
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Diagnostics mode: a single remaining plugin gets `straggler_timeout`
    pub dev_mode: bool,
    pub straggler_timeout: Duration,
}

impl Default for EnablerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poll_interval_ms: 100,
            dev_mode: false,
            straggler_timeout_secs: 300,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("nova-lifecycle");

        Self {
            plugin_dir: base.join("plugins"),
            state_file: base.join("plugin-state.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for EnablerConfig {
    fn default() -> Self {
        EnablerSettings::default().to_enabler_config()
    }
}

impl EnablerSettings {
    pub fn to_enabler_config(&self) -> EnablerConfig {
        EnablerConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            dev_mode: self.dev_mode || dev_mode_from_env(),
            straggler_timeout: Duration::from_secs(self.straggler_timeout_secs),
        }
    }
}

fn dev_mode_from_env() -> bool {
    std::env::var(DEV_MODE_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Configuration {
            reason: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given and present, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::debug!("Config {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabler.timeout_secs == 0 {
            return Err(Error::Configuration {
                reason: "enabler.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.enabler.poll_interval_ms == 0 {
            return Err(Error::Configuration {
                reason: "enabler.poll_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn enabler_config(&self) -> EnablerConfig {
        self.enabler.to_enabler_config()
    }
}
