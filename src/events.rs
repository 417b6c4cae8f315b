use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{Error, Result};

type Handler = Arc<dyn Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync>;

/// Event bus for lifecycle notifications.
///
/// Listeners register handlers for an [`EventType`] (or [`EventType::All`]);
/// handlers run synchronously on the publishing thread. Every event is also
/// sent on a broadcast channel for async observers.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
    handlers: RwLock<HashMap<EventType, Vec<(String, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for one event type, returning its subscription id
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> String
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription_id = Uuid::new_v4().to_string();
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((subscription_id.clone(), Arc::new(handler)));
        subscription_id
    }

    /// Remove a handler registered with [`EventBus::subscribe`]
    pub fn unsubscribe(&self, subscription_id: &str) {
        let mut handlers = self.handlers.write();
        for registered in handlers.values_mut() {
            registered.retain(|(id, _)| id != subscription_id);
        }
    }

    /// Receiver for every event published from now on
    pub fn subscribe_channel(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, reporting the first handler failure.
    ///
    /// All handlers run even when an earlier one fails.
    pub fn publish(&self, event: LifecycleEvent) -> Result<()> {
        let handlers: Vec<Handler> = {
            let registered = self.handlers.read();
            [event.event_type, EventType::All]
                .iter()
                .filter_map(|t| registered.get(t))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler(&event) {
                tracing::warn!("Handler for {} failed: {:#}", event.event_type, e);
                first_error.get_or_insert(e);
            }
        }

        if let Ok(count) = self.sender.send(event.clone()) {
            tracing::trace!("Published {} to {} channel subscribers", event.event_type, count);
        }

        match first_error {
            Some(e) => Err(Error::EventHandler {
                event_type: event.event_type.to_string(),
                reason: format!("{:#}", e),
            }),
            None => Ok(()),
        }
    }

    /// Publish an event, logging instead of returning handler failures
    pub fn publish_quietly(&self, event: LifecycleEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.publish(event) {
            tracing::error!("Failed to publish {}: {}", event_type, e);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn channel_subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("channel_subscribers", &self.channel_subscriber_count())
            .finish()
    }
}

/// Types of lifecycle events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    All,
    FrameworkStarting,
    FrameworkStarted,
    FrameworkShuttingDown,
    FrameworkShutdown,
    FrameworkWarmRestarting,
    FrameworkWarmRestarted,
    PluginInstalled,
    PluginEnabled,
    PluginDisabled,
    PluginUpgraded,
    PluginUninstalled,
    PluginUnloadable,
    ModuleEnabled,
    ModuleDisabled,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle notification published by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: EventType,
    /// Plugin key or module complete key the event is about
    pub subject: Option<String>,
}

impl LifecycleEvent {
    pub fn new(event_type: EventType, subject: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            event_type,
            subject,
        }
    }

    pub fn framework(event_type: EventType) -> Self {
        Self::new(event_type, None)
    }

    pub fn plugin(event_type: EventType, plugin_key: &str) -> Self {
        Self::new(event_type, Some(plugin_key.to_string()))
    }

    pub fn module(event_type: EventType, complete_key: &str) -> Self {
        Self::new(event_type, Some(complete_key.to_string()))
    }
}
