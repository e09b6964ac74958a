//! Queued dispatch: job descriptors and the hand-off planner
//!
//! Listeners that opt into asynchronous execution are not called inline.
//! Instead the planner builds a [`QueuedJob`] descriptor and hands it to the
//! queue collaborator on the resolved connection. The hand-off is
//! fire-and-forget; the dispatcher never waits on the queue.
//!
//! The descriptor is built through [`QueuedJobBuilder`] and is immutable once
//! handed over, so the queue collaborator never observes a partially
//! constructed job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::contracts::QueueResolver;
use crate::error::DispatchError;
use crate::types::{Event, EventListener, MaterializedFn, QueueableListener};

/// Job descriptor handed to the queue collaborator.
///
/// `arguments` holds the serialized event first, followed by the dispatch
/// payload. All values are owned copies, independent of any later in-process
/// mutation of the originals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Listener class to instantiate on the worker.
    pub class: String,
    /// Method to invoke on the listener.
    pub method: String,
    /// Invocation arguments: event first, then the payload.
    pub arguments: Vec<Value>,
    /// Queue connection name; `None` selects the default connection.
    pub connection: Option<String>,
    /// Queue name on the connection.
    pub queue: Option<String>,
    /// Enqueue delay.
    pub delay: Option<Duration>,
    /// Whether the worker should wait for the enclosing transaction commit.
    pub after_commit: Option<bool>,
    /// Retry backoff, opaque to the dispatcher.
    pub backoff: Option<Value>,
    /// Maximum unhandled exceptions before failing the job.
    pub max_exceptions: Option<u32>,
    /// Deadline after which the job is no longer retried.
    pub retry_until: Option<DateTime<Utc>>,
    /// Whether the payload should be encrypted at rest.
    pub encrypted: bool,
    /// Job timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Whether a timeout fails the job instead of releasing it.
    pub fail_on_timeout: bool,
    /// Maximum execution attempts.
    pub tries: Option<u32>,
    /// Job middleware, hook results ahead of static entries.
    pub middleware: Vec<String>,
}

impl QueuedJob {
    /// Start building a job for a listener class and method.
    pub fn builder(class: impl Into<String>, method: impl Into<String>) -> QueuedJobBuilder {
        QueuedJobBuilder {
            job: QueuedJob {
                class: class.into(),
                method: method.into(),
                arguments: Vec::new(),
                connection: None,
                queue: None,
                delay: None,
                after_commit: None,
                backoff: None,
                max_exceptions: None,
                retry_until: None,
                encrypted: false,
                timeout: None,
                fail_on_timeout: false,
                tries: None,
                middleware: Vec::new(),
            },
        }
    }
}

/// Builder for [`QueuedJob`].
#[derive(Debug)]
pub struct QueuedJobBuilder {
    job: QueuedJob,
}

impl QueuedJobBuilder {
    /// Set the invocation arguments.
    pub fn arguments(mut self, arguments: Vec<Value>) -> Self {
        self.job.arguments = arguments;
        self
    }

    /// Set the connection name.
    pub fn connection(mut self, connection: Option<String>) -> Self {
        self.job.connection = connection;
        self
    }

    /// Set the queue name.
    pub fn queue(mut self, queue: Option<String>) -> Self {
        self.job.queue = queue;
        self
    }

    /// Set the enqueue delay.
    pub fn delay(mut self, delay: Option<Duration>) -> Self {
        self.job.delay = delay;
        self
    }

    /// Set the after-commit flag.
    pub fn after_commit(mut self, after_commit: Option<bool>) -> Self {
        self.job.after_commit = after_commit;
        self
    }

    /// Set the retry backoff.
    pub fn backoff(mut self, backoff: Option<Value>) -> Self {
        self.job.backoff = backoff;
        self
    }

    /// Set the maximum unhandled exceptions.
    pub fn max_exceptions(mut self, max_exceptions: Option<u32>) -> Self {
        self.job.max_exceptions = max_exceptions;
        self
    }

    /// Set the retry deadline.
    pub fn retry_until(mut self, retry_until: Option<DateTime<Utc>>) -> Self {
        self.job.retry_until = retry_until;
        self
    }

    /// Set payload encryption.
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.job.encrypted = encrypted;
        self
    }

    /// Set the job timeout in milliseconds.
    pub fn timeout(mut self, timeout: Option<u64>) -> Self {
        self.job.timeout = timeout;
        self
    }

    /// Set timeout failure behavior.
    pub fn fail_on_timeout(mut self, fail_on_timeout: bool) -> Self {
        self.job.fail_on_timeout = fail_on_timeout;
        self
    }

    /// Set the maximum execution attempts.
    pub fn tries(mut self, tries: Option<u32>) -> Self {
        self.job.tries = tries;
        self
    }

    /// Set the job middleware.
    pub fn middleware(mut self, middleware: Vec<String>) -> Self {
        self.job.middleware = middleware;
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> QueuedJob {
        self.job
    }
}

/// Build the job descriptor for one queued dispatch.
///
/// Hook methods take precedence over static properties for connection,
/// queue, and delay; the after-commit flag is forced when the listener
/// declares the queue-after-commit capability; middleware hook results are
/// merged ahead of the static list. Arguments are owned copies.
pub(crate) fn build_job(
    class: &str,
    method: &str,
    listener: &dyn QueueableListener,
    event: &dyn Event,
    payload: &[Value],
) -> QueuedJob {
    let mut arguments = Vec::with_capacity(payload.len() + 1);
    arguments.push(event.to_value());
    arguments.extend(payload.iter().cloned());

    let after_commit = if listener.queue_after_commit() {
        Some(true)
    } else {
        listener.after_commit_flag()
    };

    let mut middleware = listener.middleware(event, payload);
    middleware.extend(listener.static_middleware());

    QueuedJob::builder(class, method)
        .arguments(arguments)
        .connection(listener.via_connection(payload).or_else(|| listener.connection()))
        .queue(listener.via_queue(payload).or_else(|| listener.queue()))
        .delay(listener.with_delay(payload).or_else(|| listener.delay()))
        .after_commit(after_commit)
        .backoff(listener.backoff())
        .max_exceptions(listener.max_exceptions())
        .retry_until(listener.retry_until(payload))
        .encrypted(listener.should_be_encrypted())
        .timeout(listener.timeout())
        .fail_on_timeout(listener.fail_on_timeout())
        .tries(listener.tries())
        .middleware(middleware)
        .build()
}

/// Wrap a queueable listener so invocation plans a queued hand-off.
///
/// The per-event veto hook is consulted first; a declined queue runs the
/// listener synchronously instead. Enqueueing with no queue resolver
/// configured, or a resolver yielding no factory, fails fast.
pub(crate) fn queued_listener(
    class: String,
    method: String,
    instance: Arc<dyn EventListener>,
    resolver: Option<QueueResolver>,
) -> MaterializedFn {
    Arc::new(move |event, payload| {
        let queueable = match instance.as_queueable() {
            Some(queueable) => queueable,
            // Shape changed between materialization and invocation; run inline.
            None => return instance.call(&method, event.as_ref(), payload),
        };

        if !queueable.should_queue(event.as_ref()) {
            debug!(class = %class, event = %event.name(), "listener declined queueing");
            return instance.call(&method, event.as_ref(), payload);
        }

        let resolver = resolver
            .as_ref()
            .ok_or(DispatchError::MissingCollaborator("queue resolver"))?;
        let factory = resolver().ok_or(DispatchError::MissingCollaborator("queue factory"))?;

        let job = build_job(&class, &method, queueable, event.as_ref(), payload);
        debug!(
            class = %class,
            method = %job.method,
            connection = ?job.connection,
            queue = ?job.queue,
            delay = ?job.delay,
            "queueing listener invocation"
        );

        let connection = factory.connection(job.connection.as_deref());
        let queue_name = job.queue.clone();
        match job.delay {
            Some(delay) => connection.later_on(queue_name.as_deref(), delay, job),
            None => connection.push_on(queue_name.as_deref(), job),
        }

        Ok(None)
    })
}
