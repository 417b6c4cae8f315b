//! The plugin controller.
//!
//! [`PluginController`] owns the registry, the persisted enablement state and
//! the loaders. It installs, upgrades, enables, disables and uninstalls
//! plugins, applies changes that need a restart at the next [`init`], and
//! publishes a [`LifecycleEvent`] for every transition.
//!
//! [`init`]: PluginController::init

mod lifecycle;
mod locks;
mod modules;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EnablerConfig;
use crate::enabler::PluginEnabler;
use crate::events::{EventBus, EventType, LifecycleEvent};
use crate::installer::{PluginArtifact, PluginInstaller, UnsupportedInstaller};
use crate::loader::PluginLoader;
use crate::plugin::{split_complete_key, Plugin, PluginModule, PluginState};
use crate::registry::PluginRegistry;
use crate::state::{PluginPersistentState, PluginStateStore, RestartAction, StateBuilder};
use crate::Result;

use locks::KeyedLocks;

/// Which loader a registered plugin came from, in registration order
#[derive(Debug, Clone)]
struct Origin {
    key: String,
    loader: Option<usize>,
}

pub struct PluginController {
    registry: Arc<PluginRegistry>,
    enabler: PluginEnabler,
    state: ArcSwap<PluginPersistentState>,
    state_lock: Mutex<()>,
    store: Arc<dyn PluginStateStore>,
    events: Arc<EventBus>,
    loaders: Vec<Arc<dyn PluginLoader>>,
    installer: Arc<dyn PluginInstaller>,
    origins: RwLock<Vec<Origin>>,
    install_locks: KeyedLocks,
    started: AtomicBool,
}

impl PluginController {
    pub fn new(config: EnablerConfig, store: Arc<dyn PluginStateStore>, events: Arc<EventBus>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        Self {
            enabler: PluginEnabler::new(config, Arc::clone(&registry)),
            registry,
            state: ArcSwap::from_pointee(PluginPersistentState::default()),
            state_lock: Mutex::new(()),
            store,
            events,
            loaders: Vec::new(),
            installer: Arc::new(UnsupportedInstaller),
            origins: RwLock::new(Vec::new()),
            install_locks: KeyedLocks::default(),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = installer;
        self
    }

    /// Start the plugin system.
    ///
    /// Loads the persisted state, applies removals deferred to this start,
    /// registers and enables every plugin the loaders supply, then clears all
    /// pending restart actions.
    pub fn init(&self) -> Result<()> {
        let started = Instant::now();
        tracing::info!("Starting plugin system");
        self.events
            .publish(LifecycleEvent::framework(EventType::FrameworkStarting))?;

        let persisted = self.store.load()?;
        self.state.store(Arc::new(persisted));

        let mut batch = Vec::new();
        for (index, loader) in self.loaders.iter().enumerate() {
            let plugins = match loader.load_all_plugins() {
                Ok(plugins) => plugins,
                Err(e) => {
                    tracing::error!("Loader {} failed to load plugins: {}", loader.name(), e);
                    continue;
                }
            };

            for plugin in plugins {
                if self.state().restart_action(plugin.key()) == RestartAction::Remove {
                    self.remove_at_startup(loader.as_ref(), plugin.as_ref());
                } else {
                    batch.push((Some(index), plugin));
                }
            }
        }

        self.add_plugins_from(batch);

        self.update_state(|state| {
            state.clear_all_restart_state();
        });
        if let Err(e) = self.installer.clear_backups() {
            tracing::warn!("Failed to clear installer backups: {}", e);
        }

        self.started.store(true, Ordering::SeqCst);
        self.events
            .publish_quietly(LifecycleEvent::framework(EventType::FrameworkStarted));
        tracing::info!(
            "Plugin system started in {:?} with {} plugins ({} enabled)",
            started.elapsed(),
            self.registry.len(),
            self.enabled_plugins().len()
        );
        Ok(())
    }

    fn remove_at_startup(&self, loader: &dyn PluginLoader, plugin: &dyn Plugin) {
        tracing::info!("Removing plugin {} as requested before restart", plugin.key());
        if loader.supports_removal() {
            if let Err(e) = loader.remove_plugin(plugin) {
                tracing::warn!("Failed to remove plugin {}: {}", plugin.key(), e);
            }
        } else {
            tracing::warn!(
                "Loader {} cannot remove plugin {}; skipping it instead",
                loader.name(),
                plugin.key()
            );
        }
        self.update_state(|state| {
            state.remove_plugin_state(plugin.key());
        });
    }

    /// Stop every enabled plugin, in reverse registration order, and empty
    /// the registry. Failures are logged, never returned.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down plugin system");
        self.events
            .publish_quietly(LifecycleEvent::framework(EventType::FrameworkShuttingDown));

        for plugin in self.plugins_in_order().iter().rev() {
            if plugin.state() == PluginState::Enabled {
                self.disable_modules(plugin);
                if let Err(e) = plugin.disable() {
                    tracing::warn!("Error disabling plugin {} during shutdown: {}", plugin.key(), e);
                }
            }
        }

        self.registry.clear();
        self.origins.write().clear();
        self.started.store(false, Ordering::SeqCst);

        self.events
            .publish_quietly(LifecycleEvent::framework(EventType::FrameworkShutdown));
    }

    /// Register plugins that did not come from a loader and enable those
    /// whose state says so
    pub fn add_plugins(&self, plugins: Vec<Arc<dyn Plugin>>) {
        self.add_plugins_from(plugins.into_iter().map(|p| (None, p)).collect());
    }

    pub fn install_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.add_plugins(vec![plugin]);
    }

    /// Ask every loader that supports addition for new plugins and add them.
    /// Returns how many plugins were found.
    pub fn scan_for_new_plugins(&self) -> Result<usize> {
        let mut found = Vec::new();
        for (index, loader) in self.loaders.iter().enumerate() {
            if !loader.supports_addition() {
                continue;
            }
            for plugin in loader.load_found_plugins()? {
                found.push((Some(index), plugin));
            }
        }

        let count = found.len();
        if count > 0 {
            tracing::info!("Found {} new plugins", count);
            self.add_plugins_from(found);
        }
        Ok(count)
    }

    /// Install artifacts through the configured installer and pick them up.
    ///
    /// Every descriptor is read before anything is installed, so an invalid
    /// artifact leaves the system untouched.
    pub fn install_artifacts(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        let artifacts = paths
            .iter()
            .map(|path| {
                let artifact = PluginArtifact::new(path);
                artifact.descriptor().map(|d| (d.key, artifact))
            })
            .collect::<Result<Vec<_>>>()?;

        for (key, artifact) in &artifacts {
            self.installer.install_plugin(key, artifact)?;
        }
        self.scan_for_new_plugins()?;

        Ok(artifacts.into_iter().map(|(key, _)| key).collect())
    }

    /// Undo a change that is waiting for a restart
    pub fn revert_restart_required_change(&self, key: &str) -> Result<()> {
        let lock = self.install_locks.for_key(key);
        let _guard = lock.lock();

        match self.state().restart_action(key) {
            RestartAction::None => return Ok(()),
            RestartAction::Remove => {}
            RestartAction::Upgrade => self.installer.revert_installed_plugin(key)?,
            RestartAction::Install => {
                self.installer.revert_installed_plugin(key)?;
                self.registry.remove(key);
                self.forget_origin(key);
            }
        }

        tracing::info!("Reverted pending restart change of plugin {}", key);
        self.update_state(|state| {
            state.set_restart_state(key, RestartAction::None);
        });
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Current persisted-state snapshot
    pub fn state(&self) -> Arc<PluginPersistentState> {
        self.state.load_full()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// All registered plugins, ordered by key
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut plugins = self.registry.values();
        plugins.sort_by(|a, b| a.key().cmp(b.key()));
        plugins
    }

    pub fn plugin(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.get(key)
    }

    pub fn enabled_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let state = self.state();
        self.plugins()
            .into_iter()
            .filter(|p| p.state() == PluginState::Enabled && state.is_plugin_enabled(p.as_ref()))
            .collect()
    }

    pub fn is_plugin_enabled(&self, key: &str) -> bool {
        self.registry.get(key).is_some_and(|plugin| {
            plugin.state() == PluginState::Enabled && self.state().is_plugin_enabled(plugin.as_ref())
        })
    }

    pub fn plugin_module(&self, complete_key: &str) -> Option<Arc<PluginModule>> {
        let (plugin_key, module_key) = split_complete_key(complete_key)?;
        let plugin = self.registry.get(plugin_key)?;
        plugin.module(module_key).cloned()
    }

    pub fn is_plugin_module_enabled(&self, complete_key: &str) -> bool {
        self.plugin_module(complete_key).is_some_and(|module| {
            module.is_enabled()
                && self.is_plugin_enabled(module.plugin_key())
                && self.state().is_module_enabled(Some(module.as_ref()))
        })
    }

    /// Modules of `plugin_key` that are currently running
    pub fn enabled_modules(&self, plugin_key: &str) -> Vec<Arc<PluginModule>> {
        self.registry
            .get(plugin_key)
            .map(|plugin| {
                plugin
                    .modules()
                    .iter()
                    .filter(|m| m.is_enabled())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys of registered plugins that list `key` as a requirement
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .registry
            .values()
            .into_iter()
            .filter(|p| p.key() != key && p.requires(key))
            .map(|p| p.key().to_string())
            .collect();
        dependents.sort();
        dependents
    }

    pub fn restart_action(&self, key: &str) -> RestartAction {
        self.state().restart_action(key)
    }

    /// Apply a change to the persisted state and save it.
    ///
    /// Writers are serialised; a failed save is logged and the in-memory
    /// snapshot still moves forward.
    fn update_state<F>(&self, change: F)
    where
        F: FnOnce(&mut StateBuilder),
    {
        let _guard = self.state_lock.lock();
        let current = self.state.load_full();
        let mut builder = current.to_builder();
        change(&mut builder);
        let next = builder.build();
        if next == *current {
            return;
        }

        if let Err(e) = self.store.save(&next) {
            tracing::error!("Failed to save plugin state: {}", e);
        }
        self.state.store(Arc::new(next));
    }

    fn publish(&self, event_type: EventType, key: &str) {
        self.events.publish_quietly(LifecycleEvent::plugin(event_type, key));
    }

    fn record_origin(&self, key: &str, loader: Option<usize>) {
        let mut origins = self.origins.write();
        origins.retain(|o| o.key != key);
        origins.push(Origin {
            key: key.to_string(),
            loader,
        });
    }

    fn forget_origin(&self, key: &str) {
        self.origins.write().retain(|o| o.key != key);
    }

    fn loader_for(&self, key: &str) -> Option<Arc<dyn PluginLoader>> {
        let origins = self.origins.read();
        origins
            .iter()
            .find(|o| o.key == key)
            .and_then(|o| o.loader)
            .and_then(|index| self.loaders.get(index).cloned())
    }

    /// Registered plugins grouped by loader in loader order, then plugins
    /// added directly; registration order within each group
    fn plugins_in_order(&self) -> Vec<Arc<dyn Plugin>> {
        let mut origins = self.origins.read().clone();
        origins.sort_by_key(|o| o.loader.unwrap_or(usize::MAX));
        origins
            .iter()
            .filter_map(|o| self.registry.get(&o.key))
            .collect()
    }
}

impl std::fmt::Debug for PluginController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginController")
            .field("plugins", &self.registry.len())
            .field("loaders", &self.loaders.len())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    use super::*;
    use crate::installer::DirectoryInstaller;
    use crate::loader::{DirectoryPluginLoader, StaticPluginLoader};
    use crate::plugin::{ModuleDefinition, PluginDescriptor, StaticPlugin};
    use crate::state::MemoryStateStore;
    use crate::testing::{call_log, descriptor, Behaviour, CallLog, Probe, ScriptedPlugin};
    use crate::Error;

    type Seen = Arc<Mutex<Vec<(EventType, Option<String>)>>>;

    struct Harness {
        controller: PluginController,
        store: Arc<MemoryStateStore>,
        seen: Seen,
    }

    impl Harness {
        fn new(store: PluginPersistentState, loaders: Vec<Arc<dyn PluginLoader>>) -> Self {
            let store = Arc::new(MemoryStateStore::with_state(store));
            let bus = Arc::new(EventBus::new());
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            bus.subscribe(EventType::All, move |event| {
                sink.lock().push((event.event_type, event.subject.clone()));
                Ok(())
            });

            let mut controller = PluginController::new(config(), store.clone(), bus);
            for loader in loaders {
                controller = controller.with_loader(loader);
            }
            Self {
                controller,
                store,
                seen,
            }
        }

        /// Started controller with no loaders and empty state
        fn started() -> Self {
            let harness = Self::new(PluginPersistentState::default(), Vec::new());
            harness.controller.init().unwrap();
            harness
        }

        fn position(&self, event_type: EventType, subject: &str) -> Option<usize> {
            self.seen
                .lock()
                .iter()
                .position(|(t, s)| *t == event_type && s.as_deref() == Some(subject))
        }

        fn count(&self, event_type: EventType) -> usize {
            self.seen.lock().iter().filter(|(t, _)| *t == event_type).count()
        }
    }

    fn config() -> EnablerConfig {
        EnablerConfig {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            dev_mode: false,
            straggler_timeout: Duration::from_millis(600),
        }
    }

    fn plugin(descriptor: PluginDescriptor) -> Arc<dyn Plugin> {
        Arc::new(StaticPlugin::new(descriptor))
    }

    fn probed(key: &str, modules: &[&str], log: &CallLog) -> Arc<dyn Plugin> {
        let mut desc = descriptor(key, (1, 0, 0));
        for module in modules {
            desc = desc.with_module(ModuleDefinition::new(*module));
        }
        let mut plugin = StaticPlugin::new(desc);
        for module in modules {
            plugin = plugin.with_state_aware(module, Probe::new(module, log));
        }
        Arc::new(plugin)
    }

    fn state_of(controller: &PluginController, key: &str) -> Option<PluginState> {
        controller.plugin(key).map(|p| p.state())
    }

    #[test]
    fn test_init_enables_plugins_by_default() {
        let loader = StaticPluginLoader::new(
            "static",
            vec![
                plugin(descriptor("alpha", (1, 0, 0))),
                plugin(descriptor("beta", (1, 0, 0)).disabled_by_default()),
            ],
        );
        let harness = Harness::new(PluginPersistentState::default(), vec![Arc::new(loader)]);

        harness.controller.init().unwrap();

        assert!(harness.controller.is_started());
        assert!(harness.controller.is_plugin_enabled("alpha"));
        assert!(!harness.controller.is_plugin_enabled("beta"));
        assert_eq!(state_of(&harness.controller, "beta"), Some(PluginState::Installed));

        let seen = harness.seen.lock().clone();
        assert_eq!(seen.first().map(|e| e.0), Some(EventType::FrameworkStarting));
        assert_eq!(seen.last().map(|e| e.0), Some(EventType::FrameworkStarted));
        drop(seen);
        assert!(harness.position(EventType::PluginEnabled, "alpha").is_some());
        assert!(harness.position(EventType::PluginEnabled, "beta").is_none());
    }

    #[test]
    fn test_init_fails_when_starting_event_is_rejected() {
        let harness = Harness::new(PluginPersistentState::default(), Vec::new());
        harness
            .controller
            .events()
            .subscribe(EventType::FrameworkStarting, |_| anyhow::bail!("vetoed"));

        let result = harness.controller.init();

        assert!(matches!(result, Err(Error::EventHandler { .. })));
        assert!(!harness.controller.is_started());
    }

    #[test]
    fn test_persisted_override_disables_plugin_at_start() {
        let state = PluginPersistentState::builder()
            .set_enabled("alpha", false)
            .build();
        let loader = StaticPluginLoader::new("static", vec![plugin(descriptor("alpha", (1, 0, 0)))]);
        let harness = Harness::new(state, vec![Arc::new(loader)]);

        harness.controller.init().unwrap();

        assert!(!harness.controller.is_plugin_enabled("alpha"));
    }

    #[test]
    fn test_older_version_never_mutates_registry_or_state() {
        let harness = Harness::started();
        harness
            .controller
            .add_plugins(vec![plugin(descriptor("k", (2, 0, 0)).with_module(ModuleDefinition::new("m")))]);
        harness.controller.disable_plugin_module("k:m").unwrap();

        let installed = harness.controller.plugin("k").unwrap();
        let state_before = harness.controller.state();
        let stored_before = harness.store.current();
        let events_before = harness.seen.lock().len();

        harness
            .controller
            .add_plugins(vec![plugin(descriptor("k", (1, 9, 9)))]);

        let after = harness.controller.plugin("k").unwrap();
        assert!(Arc::ptr_eq(&installed, &after));
        assert_eq!(after.state(), PluginState::Enabled);
        assert_eq!(*harness.controller.state(), *state_before);
        assert_eq!(harness.store.current(), stored_before);
        assert_eq!(harness.seen.lock().len(), events_before);
    }

    #[test]
    fn test_upgrade_keeps_overrides_of_surviving_modules() {
        let state = PluginPersistentState::builder()
            .set_enabled("k", true)
            .set_enabled("k:m1", false)
            .set_enabled("k:m2", true)
            .build();
        let harness = Harness::new(state, Vec::new());
        harness.controller.init().unwrap();

        harness.controller.add_plugins(vec![plugin(
            descriptor("k", (1, 0, 0))
                .with_module(ModuleDefinition::new("m1"))
                .with_module(ModuleDefinition::new("m2")),
        )]);
        assert!(!harness.controller.is_plugin_module_enabled("k:m1"));
        assert!(harness.controller.is_plugin_module_enabled("k:m2"));

        harness.controller.add_plugins(vec![plugin(
            descriptor("k", (2, 0, 0)).with_module(ModuleDefinition::new("m2")),
        )]);

        let expected: HashMap<String, bool> = [("k".to_string(), true), ("k:m2".to_string(), true)]
            .into_iter()
            .collect();
        assert_eq!(harness.controller.state().plugin_state_map("k"), expected);
        assert_eq!(harness.store.current().plugin_state_map("k"), expected);

        let upgraded = harness.controller.plugin("k").unwrap();
        assert_eq!(upgraded.version(), &semver::Version::new(2, 0, 0));
        assert_eq!(upgraded.state(), PluginState::Enabled);
        assert!(harness.controller.is_plugin_module_enabled("k:m2"));
        assert!(harness.position(EventType::PluginUpgraded, "k").is_some());
        assert!(harness.position(EventType::PluginUninstalled, "k").is_none());
    }

    #[test]
    fn test_upgrade_disables_dependents_without_persisting() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![
            plugin(descriptor("lib", (1, 0, 0))),
            plugin(descriptor("app", (1, 0, 0)).requiring("lib")),
        ]);
        assert!(harness.controller.is_plugin_enabled("app"));

        harness
            .controller
            .add_plugins(vec![plugin(descriptor("lib", (1, 1, 0)))]);

        assert_eq!(state_of(&harness.controller, "app"), Some(PluginState::Disabled));
        assert!(harness.controller.is_plugin_enabled("lib"));
        assert_eq!(harness.controller.state().override_for("app"), None);
    }

    #[test]
    fn test_enable_pulls_in_required_plugins() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![
            plugin(descriptor("a", (1, 0, 0)).requiring("b").disabled_by_default()),
            plugin(descriptor("b", (1, 0, 0)).disabled_by_default()),
        ]);
        assert_eq!(state_of(&harness.controller, "a"), Some(PluginState::Installed));

        let mut enabled = harness.controller.enable_plugins(&["a"]);
        enabled.sort();

        assert_eq!(enabled, vec!["a".to_string(), "b".to_string()]);
        assert!(harness.controller.is_plugin_enabled("a"));
        assert!(harness.controller.is_plugin_enabled("b"));
        assert_eq!(harness.store.current().override_for("a"), Some(true));
        assert_eq!(harness.store.current().override_for("b"), Some(true));
    }

    #[test]
    fn test_enable_unknown_plugin_is_skipped() {
        let harness = Harness::started();
        assert!(harness.controller.enable_plugins(&["ghost"]).is_empty());
    }

    #[test]
    fn test_stuck_plugin_does_not_block_batch() {
        let harness = Harness::started();
        let stuck: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(
            descriptor("y", (1, 0, 0)),
            Behaviour::Stuck,
        ));

        harness
            .controller
            .add_plugins(vec![plugin(descriptor("x", (1, 0, 0))), stuck]);

        assert!(harness.controller.is_plugin_enabled("x"));
        assert_eq!(state_of(&harness.controller, "y"), Some(PluginState::Disabled));
    }

    #[test]
    fn test_uninstall_disables_dependents_first() {
        let loader = Arc::new(
            StaticPluginLoader::new(
                "static",
                vec![
                    plugin(descriptor("lib", (1, 0, 0))),
                    plugin(descriptor("app", (1, 0, 0)).requiring("lib")),
                ],
            )
            .removable(),
        );
        let harness = Harness::new(PluginPersistentState::default(), vec![loader.clone()]);
        harness.controller.init().unwrap();
        assert_eq!(harness.controller.dependents_of("lib"), vec!["app".to_string()]);

        harness.controller.uninstall("lib").unwrap();

        assert!(harness.controller.plugin("lib").is_none());
        assert_eq!(state_of(&harness.controller, "app"), Some(PluginState::Disabled));
        assert_eq!(harness.controller.state().override_for("app"), None);
        assert_eq!(loader.removed(), vec!["lib".to_string()]);

        let disabled = harness.position(EventType::PluginDisabled, "app").unwrap();
        let uninstalled = harness.position(EventType::PluginUninstalled, "lib").unwrap();
        assert!(disabled < uninstalled);
    }

    #[test]
    fn test_uninstall_purges_plugin_state() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![plugin(
            descriptor("k", (1, 0, 0)).with_module(ModuleDefinition::new("m")),
        )]);
        harness.controller.disable_plugin_module("k:m").unwrap();
        assert_eq!(harness.store.current().override_for("k:m"), Some(false));

        harness.controller.uninstall("k").unwrap();

        assert!(harness.store.current().plugin_state_map("k").is_empty());
    }

    #[test]
    fn test_uninstall_preconditions_leave_everything_untouched() {
        let fixed = StaticPluginLoader::new("fixed", vec![plugin(descriptor("bundled", (1, 0, 0)))]);
        let harness = Harness::new(PluginPersistentState::default(), vec![Arc::new(fixed)]);
        harness.controller.init().unwrap();
        harness
            .controller
            .add_plugins(vec![plugin(descriptor("core", (1, 0, 0)).permanent())]);

        assert!(matches!(
            harness.controller.uninstall("core"),
            Err(Error::NotUninstallable { .. })
        ));
        assert!(matches!(
            harness.controller.uninstall("bundled"),
            Err(Error::RemovalUnsupported { .. })
        ));
        assert!(matches!(
            harness.controller.uninstall("ghost"),
            Err(Error::PluginNotFound { .. })
        ));

        assert!(harness.controller.is_plugin_enabled("core"));
        assert!(harness.controller.is_plugin_enabled("bundled"));
        assert_eq!(harness.count(EventType::PluginUninstalled), 0);
    }

    #[test]
    fn test_restart_required_install_is_deferred() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![plugin(
            descriptor("r", (1, 0, 0)).with_module(ModuleDefinition::new("core").requiring_restart()),
        )]);

        assert_eq!(harness.controller.restart_action("r"), RestartAction::Install);
        assert_eq!(
            harness.store.current().restart_action("r"),
            RestartAction::Install
        );

        let placeholder = harness.controller.plugin("r").unwrap();
        assert_eq!(placeholder.state(), PluginState::Unloadable);
        assert!(placeholder.unloadable_reason().is_some());
        assert!(harness.controller.enable_plugins(&["r"]).is_empty());
        assert!(!harness.controller.is_plugin_enabled("r"));
    }

    #[test]
    fn test_removal_marked_before_restart_is_applied_at_start() {
        let state = PluginPersistentState::builder()
            .set_enabled("r:core", false)
            .set_enabled("r", true)
            .set_restart_state("r", RestartAction::Remove)
            .set_restart_state("other", RestartAction::Install)
            .build();
        let loader = Arc::new(
            StaticPluginLoader::new(
                "static",
                vec![
                    plugin(descriptor("r", (1, 0, 0)).with_module(ModuleDefinition::new("core").requiring_restart())),
                    plugin(descriptor("other", (1, 0, 0))),
                ],
            )
            .removable(),
        );
        let harness = Harness::new(state, vec![loader.clone()]);

        harness.controller.init().unwrap();

        assert!(harness.controller.plugin("r").is_none());
        assert!(harness.controller.is_plugin_enabled("other"));
        assert_eq!(loader.removed(), vec!["r".to_string()]);

        let stored = harness.store.current();
        assert!(stored.plugin_state_map("r").is_empty());
        assert!(!stored.has_pending_restart());
    }

    #[test]
    fn test_restart_required_uninstall_records_removal() {
        let loader = Arc::new(
            StaticPluginLoader::new(
                "static",
                vec![plugin(
                    descriptor("r", (1, 0, 0)).with_module(ModuleDefinition::new("core").requiring_restart()),
                )],
            )
            .removable(),
        );
        let harness = Harness::new(PluginPersistentState::default(), vec![loader.clone()]);
        harness.controller.init().unwrap();
        assert!(harness.controller.is_plugin_enabled("r"));

        harness.controller.uninstall("r").unwrap();

        assert_eq!(harness.controller.restart_action("r"), RestartAction::Remove);
        assert!(harness.controller.is_plugin_enabled("r"));
        assert!(loader.removed().is_empty());

        harness.controller.revert_restart_required_change("r").unwrap();
        assert_eq!(harness.controller.restart_action("r"), RestartAction::None);
        assert!(harness.controller.is_plugin_enabled("r"));
    }

    #[test]
    fn test_module_fault_rolls_back_and_replaces_plugin() {
        let log = call_log();
        let desc = descriptor("p", (1, 0, 0))
            .with_module(ModuleDefinition::new("one"))
            .with_module(ModuleDefinition::new("two"))
            .with_module(ModuleDefinition::new("three"));
        let faulty: Arc<dyn Plugin> = Arc::new(
            StaticPlugin::new(desc)
                .with_state_aware("one", Probe::new("one", &log))
                .with_state_aware("two", Probe::failing("two", &log))
                .with_state_aware("three", Probe::new("three", &log)),
        );
        let harness = Harness::started();

        harness.controller.add_plugins(vec![faulty]);

        assert_eq!(
            *log.lock(),
            vec!["enable:one", "enable:two", "disable:one"]
        );
        let replaced = harness.controller.plugin("p").unwrap();
        assert_eq!(replaced.state(), PluginState::Unloadable);
        assert!(replaced.unloadable_reason().unwrap().contains("p:two"));
        assert!(replaced.is_uninstallable());
        assert!(replaced.modules().is_empty());
        assert!(harness.position(EventType::PluginUnloadable, "p").is_some());
        assert!(harness.position(EventType::PluginEnabled, "p").is_none());
        assert!(harness.controller.state().overrides().is_empty());
    }

    #[test]
    fn test_module_toggles_are_persisted() {
        let log = call_log();
        let harness = Harness::started();
        harness.controller.add_plugins(vec![probed("p", &["one", "two"], &log)]);
        assert_eq!(harness.controller.enabled_modules("p").len(), 2);

        harness.controller.disable_plugin_module("p:two").unwrap();
        assert!(!harness.controller.is_plugin_module_enabled("p:two"));
        assert_eq!(harness.store.current().override_for("p:two"), Some(false));

        harness.controller.enable_plugin_module("p:two").unwrap();
        assert!(harness.controller.is_plugin_module_enabled("p:two"));
        assert_eq!(harness.store.current().override_for("p:two"), None);

        assert_eq!(
            *log.lock(),
            vec!["enable:one", "enable:two", "disable:two", "enable:two"]
        );
        assert!(matches!(
            harness.controller.enable_plugin_module("p:missing"),
            Err(Error::ModuleNotFound { .. })
        ));
        assert!(matches!(
            harness.controller.disable_plugin_module("ghost:one"),
            Err(Error::PluginNotFound { .. })
        ));
    }

    #[test]
    fn test_locked_module_cannot_be_disabled() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![plugin(
            descriptor("p", (1, 0, 0)).with_module(ModuleDefinition::new("core").locked()),
        )]);

        harness.controller.disable_plugin_module("p:core").unwrap();

        assert!(harness.controller.is_plugin_module_enabled("p:core"));
        assert!(harness.controller.state().overrides().is_empty());
    }

    #[test]
    fn test_disable_plugin_persistence() {
        let harness = Harness::started();
        harness.controller.add_plugins(vec![
            plugin(descriptor("a", (1, 0, 0))),
            plugin(descriptor("b", (1, 0, 0))),
        ]);

        harness.controller.disable_plugin("a").unwrap();
        harness.controller.disable_plugin_without_persisting("b").unwrap();

        assert_eq!(state_of(&harness.controller, "a"), Some(PluginState::Disabled));
        assert_eq!(state_of(&harness.controller, "b"), Some(PluginState::Disabled));
        assert_eq!(harness.store.current().override_for("a"), Some(false));
        assert_eq!(harness.store.current().override_for("b"), None);
        assert_eq!(harness.controller.enabled_plugins().len(), 0);
    }

    #[test]
    fn test_warm_restart_reverses_plugin_order() {
        let log = call_log();
        let loader = StaticPluginLoader::new(
            "static",
            vec![probed("a", &["a"], &log), probed("b", &["b"], &log)],
        );
        let harness = Harness::new(PluginPersistentState::default(), vec![Arc::new(loader)]);
        harness.controller.init().unwrap();
        log.lock().clear();

        harness.controller.warm_restart();

        assert_eq!(
            *log.lock(),
            vec!["disable:a", "disable:b", "enable:b", "enable:a"]
        );
        assert!(harness.controller.is_plugin_enabled("a"));
        assert_eq!(harness.count(EventType::FrameworkWarmRestarted), 1);
    }

    #[test]
    fn test_shutdown_stops_plugins_in_reverse_order() {
        let log = call_log();
        let loader = StaticPluginLoader::new(
            "static",
            vec![probed("a", &["a"], &log), probed("b", &["b"], &log)],
        );
        let harness = Harness::new(PluginPersistentState::default(), vec![Arc::new(loader)]);
        harness.controller.init().unwrap();
        let a = harness.controller.plugin("a").unwrap();
        log.lock().clear();

        harness.controller.shutdown();

        assert_eq!(*log.lock(), vec!["disable:b", "disable:a"]);
        assert_eq!(a.state(), PluginState::Disabled);
        assert!(harness.controller.plugins().is_empty());
        assert!(!harness.controller.is_started());
        assert_eq!(harness.count(EventType::FrameworkShutdown), 1);
    }

    #[test]
    fn test_scan_adds_found_plugins() {
        let loader = Arc::new(StaticPluginLoader::new("static", Vec::new()));
        let harness = Harness::new(PluginPersistentState::default(), vec![loader.clone()]);
        harness.controller.init().unwrap();

        loader.add_found(plugin(descriptor("late", (1, 0, 0))));
        assert_eq!(harness.controller.scan_for_new_plugins().unwrap(), 1);
        assert!(harness.controller.is_plugin_enabled("late"));
        assert_eq!(harness.controller.scan_for_new_plugins().unwrap(), 0);
    }

    fn write_artifact(dir: &Path, file: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(file);
        fs::write(&path, body).unwrap();
        path
    }

    fn directory_harness(plugins: &Path) -> Harness {
        let harness = Harness::new(
            PluginPersistentState::default(),
            vec![Arc::new(DirectoryPluginLoader::new(plugins))],
        );
        Harness {
            controller: harness
                .controller
                .with_installer(Arc::new(DirectoryInstaller::new(plugins))),
            ..harness
        }
    }

    #[test]
    fn test_install_artifacts_through_directory() {
        let staging = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let harness = directory_harness(plugins.path());
        harness.controller.init().unwrap();

        let artifact = write_artifact(
            staging.path(),
            "tool.toml",
            "key = \"tool\"\nversion = \"1.0.0\"\n\n[[modules]]\nkey = \"cmd\"\n",
        );
        let keys = harness.controller.install_artifacts(&[artifact]).unwrap();

        assert_eq!(keys, vec!["tool".to_string()]);
        assert!(plugins.path().join("tool.toml").exists());
        assert!(harness.controller.is_plugin_module_enabled("tool:cmd"));

        harness.controller.uninstall("tool").unwrap();
        assert!(!plugins.path().join("tool.toml").exists());
    }

    #[test]
    fn test_invalid_artifact_installs_nothing() {
        let staging = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let harness = directory_harness(plugins.path());
        harness.controller.init().unwrap();

        let good = write_artifact(staging.path(), "good.toml", "key = \"good\"\nversion = \"1.0.0\"\n");
        let bad = write_artifact(staging.path(), "bad.toml", "key = \"bad:key\"\nversion = \"1.0.0\"\n");

        let result = harness.controller.install_artifacts(&[good, bad]);

        assert!(matches!(result, Err(Error::InvalidDescriptor { .. })));
        assert!(harness.controller.plugins().is_empty());
        assert!(!plugins.path().join("good.toml").exists());
    }

    #[test]
    fn test_install_without_installer_fails() {
        let staging = TempDir::new().unwrap();
        let harness = Harness::started();
        let artifact = write_artifact(staging.path(), "a.toml", "key = \"a\"\nversion = \"1.0.0\"\n");

        let result = harness.controller.install_artifacts(&[artifact]);

        assert!(matches!(result, Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_revert_of_deferred_install_removes_placeholder() {
        let staging = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let harness = directory_harness(plugins.path());
        harness.controller.init().unwrap();

        let artifact = write_artifact(
            staging.path(),
            "kernel.toml",
            "key = \"kernel\"\nversion = \"1.0.0\"\n\n[[modules]]\nkey = \"driver\"\nrequires_restart = true\n",
        );
        harness.controller.install_artifacts(&[artifact]).unwrap();
        assert_eq!(harness.controller.restart_action("kernel"), RestartAction::Install);
        assert!(plugins.path().join("kernel.toml").exists());

        harness
            .controller
            .revert_restart_required_change("kernel")
            .unwrap();

        assert_eq!(harness.controller.restart_action("kernel"), RestartAction::None);
        assert!(harness.controller.plugin("kernel").is_none());
        assert!(!plugins.path().join("kernel.toml").exists());
    }

    #[test]
    fn test_module_fault_disables_plugins_that_require_it() {
        let log = call_log();
        let faulty: Arc<dyn Plugin> = Arc::new(
            StaticPlugin::new(descriptor("lib", (1, 0, 0)).with_module(ModuleDefinition::new("m")))
                .with_state_aware("m", Probe::failing("m", &log)),
        );
        let harness = Harness::started();

        harness.controller.add_plugins(vec![
            plugin(descriptor("app", (1, 0, 0)).requiring("lib")),
            faulty,
        ]);

        assert_eq!(state_of(&harness.controller, "lib"), Some(PluginState::Unloadable));
        assert_eq!(state_of(&harness.controller, "app"), Some(PluginState::Disabled));
        assert!(!harness.controller.is_plugin_enabled("app"));
        assert!(harness.position(EventType::PluginEnabled, "app").is_none());
        assert_eq!(harness.controller.state().override_for("app"), None);
    }

    #[test]
    fn test_single_module_fault_disables_dependents() {
        let log = call_log();
        let state = PluginPersistentState::builder()
            .set_enabled("lib:m", false)
            .build();
        let lib: Arc<dyn Plugin> = Arc::new(
            StaticPlugin::new(descriptor("lib", (1, 0, 0)).with_module(ModuleDefinition::new("m")))
                .with_state_aware("m", Probe::failing("m", &log)),
        );
        let harness = Harness::new(state, Vec::new());
        harness.controller.init().unwrap();
        harness
            .controller
            .add_plugins(vec![lib, plugin(descriptor("app", (1, 0, 0)).requiring("lib"))]);
        assert!(harness.controller.is_plugin_enabled("app"));

        harness.controller.enable_plugin_module("lib:m").unwrap();

        assert_eq!(state_of(&harness.controller, "lib"), Some(PluginState::Unloadable));
        assert_eq!(state_of(&harness.controller, "app"), Some(PluginState::Disabled));
        assert!(harness.position(EventType::PluginDisabled, "app").is_some());
    }

    #[test]
    fn test_required_plugin_pulled_in_at_install_is_persisted() {
        let harness = Harness::started();

        harness.controller.add_plugins(vec![
            plugin(descriptor("b", (1, 0, 0)).disabled_by_default()),
            plugin(descriptor("a", (1, 0, 0)).requiring("b")),
        ]);

        assert!(harness.controller.is_plugin_enabled("b"));
        let enabled: Vec<String> = harness
            .controller
            .enabled_plugins()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(enabled, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(harness.store.current().override_for("b"), Some(true));
        assert!(harness.position(EventType::PluginEnabled, "b").is_some());
    }

    #[test]
    fn test_restart_required_install_then_uninstall_round_trip() {
        let state = PluginPersistentState::builder()
            .set_enabled("k:core", false)
            .build();
        let loader = Arc::new(StaticPluginLoader::new("static", Vec::new()).removable());
        let harness = Harness::new(state, vec![loader.clone()]);
        harness.controller.init().unwrap();

        loader.add_found(plugin(
            descriptor("k", (1, 0, 0)).with_module(ModuleDefinition::new("core").requiring_restart()),
        ));
        assert_eq!(harness.controller.scan_for_new_plugins().unwrap(), 1);
        assert_eq!(harness.controller.restart_action("k"), RestartAction::Install);
        assert_eq!(state_of(&harness.controller, "k"), Some(PluginState::Unloadable));
        assert!(!harness.controller.is_plugin_enabled("k"));

        harness.controller.uninstall("k").unwrap();
        assert_eq!(harness.controller.restart_action("k"), RestartAction::Remove);
        assert!(loader.removed().is_empty());

        harness.controller.shutdown();
        harness.controller.init().unwrap();

        assert!(harness.controller.plugin("k").is_none());
        assert_eq!(loader.removed(), vec!["k".to_string()]);
        let stored = harness.store.current();
        assert!(stored.plugin_state_map("k").is_empty());
        assert!(!stored.has_pending_restart());
    }

    #[test]
    fn test_concurrent_installs_of_same_key_keep_one_entry() {
        let harness = Harness::started();

        std::thread::scope(|scope| {
            for patch in 0..2u64 {
                let controller = &harness.controller;
                scope.spawn(move || {
                    controller.add_plugins(vec![plugin(
                        descriptor("k", (1, 0, patch)).with_module(ModuleDefinition::new("m")),
                    )]);
                });
            }
        });

        assert_eq!(harness.controller.plugins().len(), 1);
        let installed = harness.controller.plugin("k").unwrap();
        assert_eq!(installed.version(), &semver::Version::new(1, 0, 1));
        assert_eq!(installed.state(), PluginState::Enabled);
        assert!(harness.controller.is_plugin_module_enabled("k:m"));
        assert_eq!(*harness.controller.state(), harness.store.current());
        assert_eq!(harness.count(EventType::PluginInstalled), 1);
    }
}
