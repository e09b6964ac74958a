//! Eventide
//!
//! In-process event dispatch with listener registration, wildcard patterns,
//! priorities, and capability-driven delivery modes.
//!
//! # Overview
//!
//! Eventide routes events to listeners registered under exact names or
//! wildcard patterns. Events are plain trait objects; delivery order is
//! exact-match listeners before wildcard matches, then by priority. Events
//! and listeners opt into alternate delivery through capability hooks:
//! deferral until a surrounding transaction commits, hand-off to a queue, or
//! hand-off to a broadcast transport.
//!
//! # Architecture
//!
//! The system consists of four main components:
//!
//! 1. **Listener Registry** (`registry`): Stores registrations and resolves
//!    delivery order, with a resolution cache
//! 2. **Event Dispatcher** (`dispatcher`): Runs the delivery pipeline and
//!    exposes the public surface
//! 3. **Listener Adapter** (`adapter`): Normalizes listener shapes into a
//!    uniform invocable
//! 4. **Queued Dispatch Planner** (`queue`): Builds job descriptors for
//!    queueable listeners
//!
//! Collaborators (container, queue factory, transaction manager, broadcast
//! transport) are traits in `contracts`; every one is optional, and the
//! features needing an absent collaborator fail fast with
//! [`DispatchError::MissingCollaborator`].
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use eventide::{EventDispatcher, ListenerRef, NamedEvent};
//!
//! # fn main() -> eventide::Result<()> {
//! let dispatcher = Arc::new(EventDispatcher::new());
//!
//! dispatcher.listen_with_priority(
//!     "order.shipped",
//!     ListenerRef::closure(|_event, payload| {
//!         println!("shipping {:?}", payload);
//!         Ok(None)
//!     }),
//!     10,
//! )?;
//!
//! // Wildcard listeners receive every matching event.
//! dispatcher.listen(
//!     "order.*",
//!     ListenerRef::closure(|event, _payload| {
//!         println!("audit: {}", event.name());
//!         Ok(None)
//!     }),
//! )?;
//!
//! let responses = dispatcher.dispatch(
//!     Arc::new(NamedEvent::new("order.shipped")),
//!     vec![serde_json::json!({"order_id": 7})],
//! )?;
//! assert_eq!(responses.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod contracts;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod registry;
pub mod types;

pub use config::{DispatchConfig, ListenerBinding};
pub use contracts::{
    Broadcaster, Container, Queue, QueueFactory, QueueResolver, TransactionManager,
    TransactionManagerResolver,
};
pub use dispatcher::EventDispatcher;
pub use error::{DispatchError, Result};
pub use queue::{QueuedJob, QueuedJobBuilder};
pub use registry::{ListenerEntry, ListenerRegistry, DEFAULT_PRIORITY};
pub use types::{
    Event, EventListener, ListenerFn, ListenerRef, NamedEvent, QueueableListener, Response,
    SubscribedListener, Subscriber, SubscriberEvents, SubscriberRef,
};
