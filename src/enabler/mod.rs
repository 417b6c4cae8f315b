//! Dependency-aware enabling of plugin batches.
//!
//! The enabler expands a set of candidates with every required plugin that is
//! not yet enabled, drives each plugin through its enable transition and waits
//! (bounded by [`EnablerConfig::timeout`]) for plugins that finish enabling in
//! the background.

pub mod wait;

pub use wait::{WaitBudget, WaitStatus};

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::EnablerConfig;
use crate::plugin::{Plugin, PluginState};
use crate::registry::PluginRegistry;

/// What happened to the plugins of one `enable` call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnableReport {
    /// Plugins whose transition raised an error or whose requirements are not installed
    pub failed: Vec<String>,
    /// Plugins still enabling when the wait budget ran out
    pub timed_out: Vec<String>,
}

pub struct PluginEnabler {
    config: EnablerConfig,
    registry: Arc<PluginRegistry>,
}

impl PluginEnabler {
    pub fn new(config: EnablerConfig, registry: Arc<PluginRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &EnablerConfig {
        &self.config
    }

    /// Enable `candidates` and every disabled plugin they transitively
    /// require, returning the plugins that ended up enabled
    pub fn enable_all_recursively(&self, candidates: &[Arc<dyn Plugin>]) -> Vec<Arc<dyn Plugin>> {
        let closure = self.expand_dependencies(candidates);
        self.enable(&closure);

        let mut enabled: Vec<Arc<dyn Plugin>> = closure
            .into_iter()
            .filter(|p| p.state() == PluginState::Enabled)
            .collect();
        self.disable_unsatisfied(&mut enabled);
        enabled
    }

    /// Candidates plus the not-yet-enabled plugins they transitively require.
    ///
    /// Keys are marked visited before their requirements are walked, so
    /// cyclic requirements terminate. Membership only; no ordering is implied.
    pub fn expand_dependencies(&self, candidates: &[Arc<dyn Plugin>]) -> Vec<Arc<dyn Plugin>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut closure = Vec::new();

        for candidate in candidates {
            if !visited.insert(candidate.key().to_string()) {
                continue;
            }
            closure.push(Arc::clone(candidate));

            let mut stack = vec![Arc::clone(candidate)];
            while let Some(plugin) = stack.pop() {
                for required in plugin.required_plugins() {
                    if visited.contains(required) {
                        continue;
                    }
                    let Some(dependency) = self.registry.get(required) else {
                        continue;
                    };
                    if dependency.state() == PluginState::Enabled {
                        continue;
                    }

                    tracing::debug!(
                        "Plugin {} requires disabled plugin {}, adding it to the batch",
                        plugin.key(),
                        required
                    );
                    visited.insert(required.clone());
                    closure.push(Arc::clone(&dependency));
                    stack.push(dependency);
                }
            }
        }

        closure
    }

    /// Run every plugin's enable transition and wait for the slow ones.
    ///
    /// Failures are isolated per plugin. Plugins that do not leave `Enabling`
    /// in time are disabled; their persisted state is left alone.
    pub fn enable(&self, plugins: &[Arc<dyn Plugin>]) -> EnableReport {
        let mut report = EnableReport::default();
        let mut pending: Vec<Arc<dyn Plugin>> = Vec::new();

        for plugin in plugins {
            if let Some(missing) = plugin
                .required_plugins()
                .iter()
                .find(|key| !self.registry.contains(key))
            {
                tracing::error!(
                    "Unable to enable plugin {}: required plugin {} is not installed",
                    plugin.key(),
                    missing
                );
                report.failed.push(plugin.key().to_string());
                continue;
            }

            match plugin.enable() {
                Ok(()) => {
                    if plugin.state() == PluginState::Enabling {
                        pending.push(Arc::clone(plugin));
                    }
                }
                Err(e) => {
                    tracing::error!("Unable to enable plugin {}: {}", plugin.key(), e);
                    report.failed.push(plugin.key().to_string());
                }
            }
        }

        if !pending.is_empty() {
            self.wait_for(&mut pending);
        }

        if !pending.is_empty() {
            let keys: Vec<String> = pending.iter().map(|p| p.key().to_string()).collect();
            tracing::error!(
                "Unable to start the following plugins due to timeout while waiting for them to enable: {}",
                keys.join(", ")
            );
            for plugin in &pending {
                if let Err(e) = plugin.disable() {
                    tracing::error!("Unable to disable timed out plugin {}: {}", plugin.key(), e);
                }
            }
            report.timed_out = keys;
        }

        report
    }

    fn wait_for(&self, pending: &mut Vec<Arc<dyn Plugin>>) {
        let mut budget = WaitBudget::new(&self.config, Instant::now());

        loop {
            pending.retain(|p| p.state() == PluginState::Enabling);
            if pending.is_empty() {
                return;
            }

            let keys: Vec<&str> = pending.iter().map(|p| p.key()).collect();
            if budget.check(&keys, Instant::now()) == WaitStatus::Expired {
                return;
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    /// Disable plugins that reached `Enabled` while something they require did
    /// not, repeating until no such plugin remains
    fn disable_unsatisfied(&self, enabled: &mut Vec<Arc<dyn Plugin>>) {
        loop {
            let unsatisfied = enabled.iter().position(|plugin| {
                plugin.required_plugins().iter().any(|key| {
                    self.registry
                        .get(key)
                        .map_or(true, |dep| dep.state() != PluginState::Enabled)
                })
            });

            let Some(index) = unsatisfied else {
                return;
            };

            let plugin = enabled.remove(index);
            tracing::warn!(
                "Disabling plugin {} because one of its required plugins failed to enable",
                plugin.key()
            );
            if let Err(e) = plugin.disable() {
                tracing::error!("Unable to disable plugin {}: {}", plugin.key(), e);
            }
        }
    }
}
