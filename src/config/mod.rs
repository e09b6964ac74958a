//! Configuration loading for listener wiring
//!
//! Loads event-to-listener bindings from YAML files so deployments can wire
//! class-string listeners and subscribers without code changes. Closures
//! cannot be expressed in configuration; they are registered programmatically.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatcher::EventDispatcher;
use crate::error::{DispatchError, Result};
use crate::registry::DEFAULT_PRIORITY;
use crate::types::{ListenerRef, SubscriberRef};

/// One event-to-listener binding.
///
/// Expected YAML format:
/// ```yaml
/// listeners:
///   - event: order.shipped
///     listener: SendShipmentNotification
///     priority: 10
///   - event: "order.*"
///     listener: OrderAuditLog@record
/// subscribers:
///   - UserEventSubscriber
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerBinding {
    /// Event key, exact or wildcard.
    pub event: String,
    /// Class-string listener, with optional `Class@method` syntax.
    pub listener: String,
    /// Delivery priority; higher runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Declarative listener wiring loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Event-to-listener bindings.
    #[serde(default)]
    pub listeners: Vec<ListenerBinding>,
    /// Subscriber class references resolved through the container.
    #[serde(default)]
    pub subscribers: Vec<String>,
}

impl DispatchConfig {
    /// Parse a configuration from YAML content.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// A missing file is not an error; it yields the empty configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Check the wiring for malformed entries.
    pub fn validate(&self) -> Result<()> {
        for binding in &self.listeners {
            if binding.event.is_empty() {
                return Err(DispatchError::InvalidConfiguration(
                    "listener binding: event key cannot be empty".to_string(),
                ));
            }
            if binding.listener.is_empty() {
                return Err(DispatchError::InvalidConfiguration(format!(
                    "listener binding for '{}': listener cannot be empty",
                    binding.event
                )));
            }
            if binding.listener.starts_with('@') || binding.listener.ends_with('@') {
                return Err(DispatchError::InvalidConfiguration(format!(
                    "listener binding for '{}': malformed class reference '{}'",
                    binding.event, binding.listener
                )));
            }
        }

        for subscriber in &self.subscribers {
            if subscriber.is_empty() {
                return Err(DispatchError::InvalidConfiguration(
                    "subscriber reference cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Register every binding and subscriber on the dispatcher.
    pub fn apply(&self, dispatcher: &std::sync::Arc<EventDispatcher>) -> Result<()> {
        for binding in &self.listeners {
            dispatcher.listen_with_priority(
                &binding.event,
                ListenerRef::class(binding.listener.clone()),
                binding.priority,
            )?;
        }

        for subscriber in &self.subscribers {
            dispatcher.subscribe(SubscriberRef::Class(subscriber.clone()))?;
        }

        info!(
            listeners = self.listeners.len(),
            subscribers = self.subscribers.len(),
            "applied listener configuration"
        );
        Ok(())
    }
}
