//! Core types for the dispatch engine
//!
//! This module defines the event abstraction, the recognized listener shapes,
//! and the traits the container resolves class-string listeners and
//! subscribers to.
//!
//! # Events
//!
//! Anything implementing [`Event`] can be dispatched. The trait carries the
//! event's name plus defaulted capability hooks: deferral until the enclosing
//! transaction commits, broadcast hand-off, and propagation stopping. The
//! capabilities are checked through the type system instead of probing
//! properties at runtime.
//!
//! [`NamedEvent`] is the provided string-named implementation, used by
//! callers that dispatch by bare name and by the pushed-event machinery.
//!
//! # Listener shapes
//!
//! Listeners are registered as a [`ListenerRef`], a tagged variant covering
//! the recognized shapes:
//!
//! - a plain closure,
//! - a class string with an implicit `handle` method (`"Reports"` or the
//!   `"Reports@send"` method syntax),
//! - an explicit class/method pair.
//!
//! Class strings are resolved through the configured container at
//! materialization time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Something that can be dispatched to listeners.
///
/// Only `name` is required. The capability hooks default to "plain event":
/// no deferral, no broadcast, propagation never stopped.
pub trait Event: Send + Sync {
    /// Concrete event name used for listener resolution.
    fn name(&self) -> &str;

    /// Additional names this event answers to.
    ///
    /// Exact-key matching is polymorphic: a listener registered under any of
    /// these names also receives the event. Use this where a class hierarchy
    /// or a shared capability would match in a dynamic language.
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether delivery should wait for the enclosing transaction to commit.
    fn dispatch_after_commit(&self) -> bool {
        false
    }

    /// Whether the event should be handed to the broadcast collaborator.
    fn should_broadcast(&self) -> bool {
        false
    }

    /// Per-occurrence broadcast veto, consulted only when
    /// [`should_broadcast`](Event::should_broadcast) is true.
    fn broadcast_when(&self) -> bool {
        true
    }

    /// Whether a listener has stopped propagation of this event.
    ///
    /// Implementations that support stopping typically flip an internal
    /// `AtomicBool` from a listener.
    fn propagation_stopped(&self) -> bool {
        false
    }

    /// Serialized form of the event, used as the first queued-job argument.
    fn to_value(&self) -> Value {
        Value::Null
    }
}

/// String-named event with no payload of its own.
#[derive(Debug, Clone)]
pub struct NamedEvent {
    name: String,
}

impl NamedEvent {
    /// Create an event identified only by its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Event for NamedEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_value(&self) -> Value {
        Value::String(self.name.clone())
    }
}

/// Response produced by a listener.
///
/// `Some(Value::Bool(false))` is the halt sentinel: delivery stops at the
/// listener that returned it.
pub type Response = Option<Value>;

/// A plain invocable listener.
pub type ListenerFn = Arc<dyn Fn(&dyn Event, &[Value]) -> Result<Response> + Send + Sync>;

/// Uniform invocable produced by materialization. Takes the event by shared
/// ownership so deferred and queued wrappers can capture it.
pub(crate) type MaterializedFn =
    Arc<dyn Fn(&Arc<dyn Event>, &[Value]) -> Result<Response> + Send + Sync>;

/// A registered listener reference, normalized at materialization time.
#[derive(Clone)]
pub enum ListenerRef {
    /// Plain closure invoked directly.
    Closure(ListenerFn),
    /// Class string with an implicit `handle` method. `Class@method` syntax
    /// selects a different method.
    Class(String),
    /// Explicit class/method pair.
    ClassMethod(String, String),
}

impl ListenerRef {
    /// Wrap a closure as a listener reference.
    pub fn closure<F>(listener: F) -> Self
    where
        F: Fn(&dyn Event, &[Value]) -> Result<Response> + Send + Sync + 'static,
    {
        Self::Closure(Arc::new(listener))
    }

    /// Reference a class-string listener (`"Reports"` or `"Reports@send"`).
    pub fn class(class: impl Into<String>) -> Self {
        Self::Class(class.into())
    }

    /// Reference a class/method pair.
    pub fn class_method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::ClassMethod(class.into(), method.into())
    }
}

impl fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closure(_) => f.write_str("Closure(..)"),
            Self::Class(class) => f.debug_tuple("Class").field(class).finish(),
            Self::ClassMethod(class, method) => {
                f.debug_tuple("ClassMethod").field(class).field(method).finish()
            }
        }
    }
}

/// A listener instance resolved from the container.
///
/// The dispatcher invokes listeners through `call` with the method name the
/// registration asked for. `responds_to` drives the fallback to the
/// conventional invoke method when the requested method is absent.
pub trait EventListener: Send + Sync {
    /// Invoke a named method on this listener.
    fn call(&self, method: &str, event: &dyn Event, payload: &[Value]) -> Result<Response>;

    /// Whether this listener exposes the given method.
    fn responds_to(&self, method: &str) -> bool;

    /// Queueing capability accessor.
    ///
    /// Returning `Some` routes invocation through the queued dispatch
    /// planner instead of calling inline.
    fn as_queueable(&self) -> Option<&dyn QueueableListener> {
        None
    }

    /// Whether invocation should wait for the enclosing transaction commit.
    fn after_commit(&self) -> bool {
        false
    }
}

/// Queueing hooks for listeners that opt into asynchronous execution.
///
/// The `via_*` / `with_delay` / `retry_until` / `middleware` hooks may
/// consult the dispatch payload and take precedence over their static
/// counterparts when building the job descriptor.
pub trait QueueableListener: EventListener {
    /// Per-event veto: returning false runs the listener synchronously.
    fn should_queue(&self, _event: &dyn Event) -> bool {
        true
    }

    /// Connection hook, preferred over [`connection`](Self::connection).
    fn via_connection(&self, _payload: &[Value]) -> Option<String> {
        None
    }

    /// Static connection name.
    fn connection(&self) -> Option<String> {
        None
    }

    /// Queue hook, preferred over [`queue`](Self::queue).
    fn via_queue(&self, _payload: &[Value]) -> Option<String> {
        None
    }

    /// Static queue name.
    fn queue(&self) -> Option<String> {
        None
    }

    /// Delay hook, preferred over [`delay`](Self::delay).
    fn with_delay(&self, _payload: &[Value]) -> Option<Duration> {
        None
    }

    /// Static enqueue delay.
    fn delay(&self) -> Option<Duration> {
        None
    }

    /// Whether the job must wait for the enclosing transaction commit.
    ///
    /// Forces the descriptor's after-commit flag to true; otherwise the flag
    /// is copied from [`after_commit_flag`](Self::after_commit_flag).
    fn queue_after_commit(&self) -> bool {
        false
    }

    /// Explicit after-commit flag carried onto the descriptor.
    fn after_commit_flag(&self) -> Option<bool> {
        None
    }

    /// Retry backoff, opaque to the dispatcher.
    fn backoff(&self) -> Option<Value> {
        None
    }

    /// Maximum unhandled exceptions before the job is failed.
    fn max_exceptions(&self) -> Option<u32> {
        None
    }

    /// Deadline after which the job is no longer retried.
    fn retry_until(&self, _payload: &[Value]) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether the queued payload should be encrypted at rest.
    fn should_be_encrypted(&self) -> bool {
        false
    }

    /// Job timeout in milliseconds.
    fn timeout(&self) -> Option<u64> {
        None
    }

    /// Whether a timeout fails the job instead of releasing it.
    fn fail_on_timeout(&self) -> bool {
        false
    }

    /// Maximum execution attempts.
    fn tries(&self) -> Option<u32> {
        None
    }

    /// Middleware hook; merged ahead of
    /// [`static_middleware`](Self::static_middleware).
    fn middleware(&self, _event: &dyn Event, _payload: &[Value]) -> Vec<String> {
        Vec::new()
    }

    /// Static middleware list.
    fn static_middleware(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A subscriber bundle that registers several listeners at once.
pub trait Subscriber: Send + Sync {
    /// Class reference used when the returned map names bare methods.
    fn class_name(&self) -> &str;

    /// Register listeners on the dispatcher.
    ///
    /// Either call back into `listen` directly and return
    /// [`SubscriberEvents::Handled`], or return a mapping of event key to
    /// listeners for the dispatcher to register.
    fn subscribe(&self, dispatcher: &Arc<crate::dispatcher::EventDispatcher>) -> SubscriberEvents;
}

/// Outcome of a subscriber's `subscribe` hook.
pub enum SubscriberEvents {
    /// The subscriber registered its listeners itself.
    Handled,
    /// Mapping of event key to listeners for the dispatcher to register.
    Map(Vec<(String, Vec<SubscribedListener>)>),
}

/// One listener entry in a subscriber's event map.
pub enum SubscribedListener {
    /// Bare method name, resolved against the subscriber's own class.
    Method(String),
    /// Anything else goes through the normal `listen` path.
    Listener(ListenerRef),
}

/// How to reference a subscriber when calling `subscribe`.
pub enum SubscriberRef {
    /// Use the given instance as-is.
    Instance(Arc<dyn Subscriber>),
    /// Resolve the class reference through the container.
    Class(String),
}
