//! Event dispatcher: the dispatch pipeline and public surface
//!
//! The dispatcher orchestrates delivery: the transaction-deferral decision,
//! the broadcast hand-off, listener materialization through the adapter, and
//! ordered invocation with halting semantics. It owns no listener state
//! itself; the registry does, behind a reader-writer lock so registration
//! and dispatch can run from multiple threads.
//!
//! Delivery is synchronous and depth-first. A listener may reentrantly call
//! `dispatch`, `listen`, or `forget`: the listener sequence for an in-flight
//! dispatch is a value snapshot taken before iteration begins, so mid-flight
//! registry mutation affects only subsequent dispatches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::Value;
use tracing::{debug, error};

use crate::adapter::{self, MaterializeContext};
use crate::contracts::{
    Broadcaster, Container, QueueFactory, QueueResolver, TransactionManager,
    TransactionManagerResolver,
};
use crate::error::{DispatchError, Result};
use crate::registry::{ListenerEntry, ListenerRegistry, DEFAULT_PRIORITY};
use crate::types::{
    Event, ListenerRef, NamedEvent, Response, SubscribedListener, SubscriberEvents, SubscriberRef,
};

/// Suffix of the synthetic exact keys created by `push`.
const PUSHED_SUFFIX: &str = "_pushed";

/// In-process event dispatcher.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use eventide::{EventDispatcher, ListenerRef, NamedEvent};
///
/// let dispatcher = Arc::new(EventDispatcher::new());
/// dispatcher
///     .listen("order.shipped", ListenerRef::closure(|event, _payload| {
///         println!("shipped: {}", event.name());
///         Ok(None)
///     }))
///     .unwrap();
///
/// dispatcher
///     .dispatch(Arc::new(NamedEvent::new("order.shipped")), Vec::new())
///     .unwrap();
/// ```
pub struct EventDispatcher {
    registry: RwLock<ListenerRegistry>,
    container: Option<Arc<dyn Container>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    queue_resolver: RwLock<Option<QueueResolver>>,
    transaction_resolver: RwLock<Option<TransactionManagerResolver>>,
}

/// Internal outcome of one pipeline run.
enum Dispatched {
    Responses(Vec<Response>),
    Halted(Response),
}

impl EventDispatcher {
    /// Create a dispatcher with no collaborators configured.
    ///
    /// Closures dispatch fine in this configuration; class-string listeners,
    /// subscribers given by class, queued and after-commit execution, and
    /// broadcasting each fail fast until their collaborator is provided.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(ListenerRegistry::new()),
            container: None,
            broadcaster: None,
            queue_resolver: RwLock::new(None),
            transaction_resolver: RwLock::new(None),
        }
    }

    /// Attach the object-resolution container.
    pub fn with_container(mut self, container: Arc<dyn Container>) -> Self {
        self.container = Some(container);
        self
    }

    /// Attach the broadcast transport.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Set the queue factory resolver used for queueable listeners.
    pub fn set_queue_resolver<F>(&self, resolver: F) -> Result<()>
    where
        F: Fn() -> Option<Arc<dyn QueueFactory>> + Send + Sync + 'static,
    {
        let mut slot = self
            .queue_resolver
            .write()
            .map_err(|err| DispatchError::LockPoisoned(err.to_string()))?;
        *slot = Some(Arc::new(resolver));
        Ok(())
    }

    /// Set the transaction manager resolver used for deferred delivery.
    pub fn set_transaction_manager_resolver<F>(&self, resolver: F) -> Result<()>
    where
        F: Fn() -> Option<Arc<dyn TransactionManager>> + Send + Sync + 'static,
    {
        let mut slot = self
            .transaction_resolver
            .write()
            .map_err(|err| DispatchError::LockPoisoned(err.to_string()))?;
        *slot = Some(Arc::new(resolver));
        Ok(())
    }

    /// Register a listener with the default priority.
    pub fn listen(&self, event: impl AsRef<str>, listener: ListenerRef) -> Result<()> {
        self.listen_with_priority(event, listener, DEFAULT_PRIORITY)
    }

    /// Register a listener with an explicit priority. Higher priorities are
    /// delivered first.
    pub fn listen_with_priority(
        &self,
        event: impl AsRef<str>,
        listener: ListenerRef,
        priority: i32,
    ) -> Result<()> {
        self.registry_write()?.register(event.as_ref(), listener, priority);
        Ok(())
    }

    /// Remove every registration under an event key.
    pub fn forget(&self, event: impl AsRef<str>) -> Result<()> {
        self.registry_write()?.forget(event.as_ref());
        Ok(())
    }

    /// Remove every pushed-event registration.
    pub fn forget_pushed(&self) -> Result<()> {
        let mut registry = self.registry_write()?;
        let pushed: Vec<String> = registry
            .exact_keys()
            .into_iter()
            .filter(|key| key.ends_with(PUSHED_SUFFIX))
            .collect();
        for key in pushed {
            registry.forget(&key);
        }
        Ok(())
    }

    /// Whether any registration matches this event name.
    pub fn has_listeners(&self, event: impl AsRef<str>) -> Result<bool> {
        Ok(self.registry_read()?.has(event.as_ref()))
    }

    /// Whether some registered wildcard pattern matches this event name.
    pub fn has_wildcard_listeners(&self, event: impl AsRef<str>) -> Result<bool> {
        Ok(self.registry_read()?.has_wildcard(event.as_ref()))
    }

    /// Resolved delivery order for a concrete event name.
    pub fn get_listeners(&self, event: impl AsRef<str>) -> Result<Vec<ListenerRef>> {
        Ok(self.registry_write()?.listeners_for(event.as_ref(), &[]))
    }

    /// Resolved delivery order for an event instance, including its aliases.
    pub fn get_listeners_for(&self, event: &dyn Event) -> Result<Vec<ListenerRef>> {
        Ok(self
            .registry_write()?
            .listeners_for(event.name(), &event.aliases()))
    }

    /// Snapshot of the raw exact-key registrations.
    pub fn get_raw_listeners(&self) -> Result<HashMap<String, Vec<ListenerEntry>>> {
        Ok(self.registry_read()?.all())
    }

    /// Dispatch an event to its listeners, returning their responses in
    /// delivery order.
    ///
    /// When the event declares after-commit delivery and a transaction
    /// manager is resolvable, delivery is deferred to the commit callback
    /// and an empty response list is returned immediately.
    pub fn dispatch(
        self: &Arc<Self>,
        event: Arc<dyn Event>,
        payload: Vec<Value>,
    ) -> Result<Vec<Response>> {
        match self.dispatch_with(event, payload, false)? {
            Dispatched::Responses(responses) => Ok(responses),
            Dispatched::Halted(response) => Ok(vec![response]),
        }
    }

    /// Dispatch in halt mode: at most one listener runs and its response is
    /// returned.
    pub fn until(self: &Arc<Self>, event: Arc<dyn Event>, payload: Vec<Value>) -> Result<Response> {
        match self.dispatch_with(event, payload, true)? {
            Dispatched::Halted(response) => Ok(response),
            Dispatched::Responses(_) => Ok(None),
        }
    }

    /// Register a subscriber bundle.
    pub fn subscribe(self: &Arc<Self>, subscriber: SubscriberRef) -> Result<()> {
        let instance = match subscriber {
            SubscriberRef::Instance(instance) => instance,
            SubscriberRef::Class(class) => self
                .container
                .as_ref()
                .ok_or(DispatchError::MissingCollaborator("container"))?
                .make_subscriber(&class)?,
        };

        match instance.subscribe(self) {
            SubscriberEvents::Handled => Ok(()),
            SubscriberEvents::Map(map) => {
                for (event, listeners) in map {
                    for listener in listeners {
                        let reference = match listener {
                            SubscribedListener::Method(method) => ListenerRef::class_method(
                                instance.class_name().to_string(),
                                method,
                            ),
                            SubscribedListener::Listener(reference) => reference,
                        };
                        self.listen(&event, reference)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Park an event occurrence for a later `flush`.
    ///
    /// Registers a synthetic listener under `"{event}_pushed"` that
    /// re-dispatches the event with the captured payload.
    pub fn push(self: &Arc<Self>, event: impl Into<String>, payload: Vec<Value>) -> Result<()> {
        let name = event.into();
        let key = format!("{name}{PUSHED_SUFFIX}");
        // Weak, so listeners stored in the registry do not keep the
        // dispatcher alive through itself.
        let dispatcher = Arc::downgrade(self);
        let listener = ListenerRef::closure(move |_event, _payload| {
            match Weak::upgrade(&dispatcher) {
                Some(dispatcher) => {
                    dispatcher.dispatch(Arc::new(NamedEvent::new(name.clone())), payload.clone())?;
                    Ok(None)
                }
                None => Ok(None),
            }
        });
        self.listen(key, listener)
    }

    /// Dispatch a previously pushed event.
    pub fn flush(self: &Arc<Self>, event: impl AsRef<str>) -> Result<()> {
        let key = format!("{}{PUSHED_SUFFIX}", event.as_ref());
        self.dispatch(Arc::new(NamedEvent::new(key)), Vec::new())?;
        Ok(())
    }

    fn dispatch_with(
        self: &Arc<Self>,
        event: Arc<dyn Event>,
        payload: Vec<Value>,
        halt: bool,
    ) -> Result<Dispatched> {
        if event.dispatch_after_commit() {
            let resolver = self
                .transaction_resolver
                .read()
                .map_err(|err| DispatchError::LockPoisoned(err.to_string()))?
                .clone();
            if let Some(resolver) = resolver {
                if let Some(manager) = resolver() {
                    debug!(event = %event.name(), "deferring dispatch until transaction commit");
                    let dispatcher = Arc::clone(self);
                    manager.add_callback(Box::new(move || {
                        if let Err(err) = dispatcher.invoke(&event, &payload, halt) {
                            error!(
                                event = %event.name(),
                                error = %err,
                                "deferred dispatch failed"
                            );
                        }
                    }));
                    return Ok(Dispatched::Responses(Vec::new()));
                }
            }
        }

        self.invoke(&event, &payload, halt)
    }

    fn invoke(&self, event: &Arc<dyn Event>, payload: &[Value], halt: bool) -> Result<Dispatched> {
        if event.should_broadcast() && event.broadcast_when() {
            let broadcaster = self
                .broadcaster
                .as_ref()
                .ok_or(DispatchError::MissingCollaborator("broadcaster"))?;
            debug!(event = %event.name(), "handing event to broadcast transport");
            broadcaster.queue(event.as_ref());
        }

        // Value snapshot: reentrant listen/forget/dispatch from a listener
        // must not disturb this iteration.
        let listeners = {
            let mut registry = self.registry_write()?;
            registry.listeners_for(event.name(), &event.aliases())
        };

        let context = self.materialize_context()?;
        let mut responses = Vec::new();

        for reference in &listeners {
            let callable = adapter::materialize(reference, &context)?;
            let response = callable(event, payload)?;
            debug!(
                event = %event.name(),
                listener = ?reference,
                response = ?response,
                "listener invoked"
            );

            if halt {
                return Ok(Dispatched::Halted(response));
            }
            if matches!(&response, Some(Value::Bool(false))) {
                break;
            }
            responses.push(response);
            if event.propagation_stopped() {
                break;
            }
        }

        Ok(Dispatched::Responses(responses))
    }

    fn materialize_context(&self) -> Result<MaterializeContext> {
        Ok(MaterializeContext {
            container: self.container.clone(),
            queue_resolver: self
                .queue_resolver
                .read()
                .map_err(|err| DispatchError::LockPoisoned(err.to_string()))?
                .clone(),
            transaction_resolver: self
                .transaction_resolver
                .read()
                .map_err(|err| DispatchError::LockPoisoned(err.to_string()))?
                .clone(),
        })
    }

    fn registry_read(&self) -> Result<RwLockReadGuard<'_, ListenerRegistry>> {
        self.registry
            .read()
            .map_err(|err| DispatchError::LockPoisoned(err.to_string()))
    }

    fn registry_write(&self) -> Result<RwLockWriteGuard<'_, ListenerRegistry>> {
        self.registry
            .write()
            .map_err(|err| DispatchError::LockPoisoned(err.to_string()))
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
