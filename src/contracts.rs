//! Collaborator contracts consumed by the dispatch engine
//!
//! The engine does not implement object resolution, queuing, broadcasting,
//! or transaction bookkeeping. It consumes them through the narrow traits
//! defined here; hosts provide implementations and tests use mocks.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::queue::QueuedJob;
use crate::types::{Event, EventListener, Subscriber};

/// Object-resolution container used to instantiate class-string listeners
/// and subscribers.
pub trait Container: Send + Sync {
    /// Resolve a listener instance for a class reference.
    fn make_listener(&self, class: &str) -> Result<Arc<dyn EventListener>>;

    /// Resolve a subscriber instance for a class reference.
    fn make_subscriber(&self, class: &str) -> Result<Arc<dyn Subscriber>>;
}

/// Database transaction manager.
///
/// Guarantees a registered callback runs exactly once when the active
/// transaction commits and is discarded on rollback. The dispatcher only
/// registers; it never waits.
pub trait TransactionManager: Send + Sync {
    /// Register a callback to run on commit of the active transaction.
    fn add_callback(&self, callback: Box<dyn FnOnce() + Send>);
}

/// A single queue connection. Enqueue operations are fire-and-forget.
pub trait Queue: Send + Sync {
    /// Enqueue a job immediately on the named queue.
    fn push_on(&self, queue: Option<&str>, job: QueuedJob);

    /// Enqueue a job after the given delay.
    fn later_on(&self, queue: Option<&str>, delay: Duration, job: QueuedJob);
}

/// Factory handing out queue connections by name.
pub trait QueueFactory: Send + Sync {
    /// Resolve a connection; `None` selects the default connection.
    fn connection(&self, name: Option<&str>) -> Arc<dyn Queue>;
}

/// Broadcast transport: enqueues an event for asynchronous delivery to
/// external consumers.
pub trait Broadcaster: Send + Sync {
    /// Hand an event to the broadcast transport.
    fn queue(&self, event: &dyn Event);
}

/// Zero-argument resolver for the queue factory.
///
/// Returning `None` means no queue backend is configured.
pub type QueueResolver = Arc<dyn Fn() -> Option<Arc<dyn QueueFactory>> + Send + Sync>;

/// Zero-argument resolver for the transaction manager.
///
/// Returning `None` means no transaction is being tracked; deferred work
/// runs inline instead.
pub type TransactionManagerResolver =
    Arc<dyn Fn() -> Option<Arc<dyn TransactionManager>> + Send + Sync>;
