//! Fixture plugins shared by the unit tests.

use parking_lot::Mutex;
use semver::Version;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::plugin::{
    Plugin, PluginDescriptor, PluginModule, PluginState, StateAware, StateCell,
};
use crate::{Error, Result};

/// How a [`ScriptedPlugin`] reacts to `enable`
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Reaches `Enabled` on a background thread after the delay
    Deferred(Duration),
    /// Stays in `Enabling` forever
    Stuck,
    /// Returns an error without changing state
    Fail,
}

#[derive(Debug)]
pub struct ScriptedPlugin {
    descriptor: PluginDescriptor,
    modules: Vec<Arc<PluginModule>>,
    state: Arc<StateCell>,
    behaviour: Behaviour,
}

impl ScriptedPlugin {
    pub fn new(descriptor: PluginDescriptor, behaviour: Behaviour) -> Self {
        let modules = descriptor
            .modules
            .iter()
            .map(|d| Arc::new(PluginModule::new(&descriptor.key, d.clone())))
            .collect();
        Self {
            descriptor,
            modules,
            state: Arc::new(StateCell::new(PluginState::Installed)),
            behaviour,
        }
    }
}

impl Plugin for ScriptedPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn modules(&self) -> &[Arc<PluginModule>] {
        &self.modules
    }

    fn state(&self) -> PluginState {
        self.state.get()
    }

    fn enable(&self) -> Result<()> {
        match self.behaviour {
            Behaviour::Fail => Err(Error::transition(self.key(), "enable", "scripted failure")),
            Behaviour::Stuck => {
                self.state.set(PluginState::Enabling);
                Ok(())
            }
            Behaviour::Deferred(delay) => {
                self.state.set(PluginState::Enabling);
                let state = Arc::clone(&self.state);
                thread::spawn(move || {
                    thread::sleep(delay);
                    state.transition(PluginState::Enabling, PluginState::Enabled);
                });
                Ok(())
            }
        }
    }

    fn disable(&self) -> Result<()> {
        self.state.set(PluginState::Disabled);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.state.set(PluginState::Uninstalled);
        Ok(())
    }
}

/// Shared log of module hook calls, in call order
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// State-aware module hooks that record calls and can be told to fail
pub struct Probe {
    name: String,
    log: CallLog,
    fail_enable: bool,
}

impl Probe {
    pub fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_enable: false,
        })
    }

    pub fn failing(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_enable: true,
        })
    }
}

impl StateAware for Probe {
    fn on_enable(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("enable:{}", self.name));
        if self.fail_enable {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    fn on_disable(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("disable:{}", self.name));
        Ok(())
    }
}

pub fn descriptor(key: &str, version: (u64, u64, u64)) -> PluginDescriptor {
    PluginDescriptor::new(key, Version::new(version.0, version.1, version.2))
}
