//! Listener materialization
//!
//! Normalizes every registered [`ListenerRef`] shape into a uniform
//! invocable taking `(event, payload)`. Normalization happens once per
//! invocation path, not via runtime type probing scattered through the
//! dispatch pipeline:
//!
//! - closures pass through;
//! - class strings are parsed with `Class@method` syntax (default method
//!   `handle`), resolved through the container, and fall back to the
//!   conventional invoke method when the requested method is absent;
//! - the queueable capability wraps the call through the queued dispatch
//!   planner;
//! - the after-commit capability wraps the call in a transaction-manager
//!   callback registration.

use std::sync::Arc;

use tracing::error;

use crate::contracts::{Container, QueueResolver, TransactionManagerResolver};
use crate::error::{DispatchError, Result};
use crate::queue;
use crate::types::{EventListener, ListenerRef, MaterializedFn};

/// Default method invoked on class-string listeners.
pub const HANDLE_METHOD: &str = "handle";

/// Conventional fallback when the requested method is absent, the analogue
/// of an invokable class.
pub const INVOKE_METHOD: &str = "invoke";

/// Collaborator handles captured at materialization time.
#[derive(Clone)]
pub(crate) struct MaterializeContext {
    pub container: Option<Arc<dyn Container>>,
    pub queue_resolver: Option<QueueResolver>,
    pub transaction_resolver: Option<TransactionManagerResolver>,
}

/// Normalize a listener reference into a uniform invocable.
pub(crate) fn materialize(
    reference: &ListenerRef,
    context: &MaterializeContext,
) -> Result<MaterializedFn> {
    match reference {
        ListenerRef::Closure(listener) => {
            let listener = listener.clone();
            Ok(Arc::new(move |event, payload| listener(event.as_ref(), payload)))
        }
        ListenerRef::Class(spec) => {
            let (class, method) = parse_callback(spec, HANDLE_METHOD);
            materialize_class(&class, &method, context)
        }
        ListenerRef::ClassMethod(class, method) => materialize_class(class, method, context),
    }
}

/// Split a `Class@method` string, defaulting the method when absent.
pub(crate) fn parse_callback(spec: &str, default_method: &str) -> (String, String) {
    match spec.split_once('@') {
        Some((class, method)) if !method.is_empty() => (class.to_string(), method.to_string()),
        Some((class, _)) => (class.to_string(), default_method.to_string()),
        None => (spec.to_string(), default_method.to_string()),
    }
}

fn materialize_class(
    class: &str,
    method: &str,
    context: &MaterializeContext,
) -> Result<MaterializedFn> {
    let container = context
        .container
        .clone()
        .ok_or(DispatchError::MissingCollaborator("container"))?;
    let instance = container.make_listener(class)?;

    let method = if instance.responds_to(method) {
        method.to_string()
    } else if instance.responds_to(INVOKE_METHOD) {
        INVOKE_METHOD.to_string()
    } else {
        return Err(DispatchError::UnsupportedListener(format!(
            "`{class}` has neither a `{method}` nor an `{INVOKE_METHOD}` method"
        )));
    };

    if instance.as_queueable().is_some() {
        return Ok(queue::queued_listener(
            class.to_string(),
            method,
            instance,
            context.queue_resolver.clone(),
        ));
    }

    if instance.after_commit() {
        let resolver = context
            .transaction_resolver
            .clone()
            .ok_or(DispatchError::MissingCollaborator("transaction manager resolver"))?;
        return Ok(after_commit_listener(instance, method, resolver));
    }

    Ok(Arc::new(move |event, payload| {
        instance.call(&method, event.as_ref(), payload)
    }))
}

/// Wrap a listener so invocation registers a transaction-commit callback.
///
/// When the resolver yields no manager at call time there is no transaction
/// to wait for and the listener runs inline.
fn after_commit_listener(
    instance: Arc<dyn EventListener>,
    method: String,
    resolver: TransactionManagerResolver,
) -> MaterializedFn {
    Arc::new(move |event, payload| match resolver() {
        Some(manager) => {
            let instance = instance.clone();
            let method = method.clone();
            let event = event.clone();
            let payload = payload.to_vec();
            manager.add_callback(Box::new(move || {
                if let Err(err) = instance.call(&method, event.as_ref(), &payload) {
                    error!(
                        event = %event.name(),
                        method = %method,
                        error = %err,
                        "deferred listener failed"
                    );
                }
            }));
            Ok(None)
        }
        None => instance.call(&method, event.as_ref(), payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TransactionManager;
    use crate::types::{Event, NamedEvent, Response, Subscriber};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct PlainListener {
        method: &'static str,
    }

    impl EventListener for PlainListener {
        fn call(&self, method: &str, _event: &dyn Event, _payload: &[Value]) -> Result<Response> {
            Ok(Some(json!(method)))
        }

        fn responds_to(&self, method: &str) -> bool {
            method == self.method
        }
    }

    struct FixedContainer {
        method: &'static str,
    }

    impl Container for FixedContainer {
        fn make_listener(&self, _class: &str) -> Result<Arc<dyn EventListener>> {
            Ok(Arc::new(PlainListener { method: self.method }))
        }

        fn make_subscriber(&self, class: &str) -> Result<Arc<dyn Subscriber>> {
            Err(DispatchError::ResolutionFailed {
                class: class.to_string(),
                reason: "no subscribers here".to_string(),
            })
        }
    }

    fn context(container: Option<Arc<dyn Container>>) -> MaterializeContext {
        MaterializeContext {
            container,
            queue_resolver: None,
            transaction_resolver: None,
        }
    }

    fn invoke(callable: &MaterializedFn) -> Result<Response> {
        let event: Arc<dyn Event> = Arc::new(NamedEvent::new("user.created"));
        callable(&event, &[])
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback("Reports@send", HANDLE_METHOD),
            ("Reports".to_string(), "send".to_string())
        );
        assert_eq!(
            parse_callback("Reports", HANDLE_METHOD),
            ("Reports".to_string(), "handle".to_string())
        );
        assert_eq!(
            parse_callback("Reports@", HANDLE_METHOD),
            ("Reports".to_string(), "handle".to_string())
        );
    }

    #[test]
    fn test_closure_passes_through() {
        let reference = ListenerRef::closure(|event, _payload| {
            Ok(Some(Value::String(event.name().to_string())))
        });
        let callable = materialize(&reference, &context(None)).unwrap();
        assert_eq!(invoke(&callable).unwrap(), Some(json!("user.created")));
    }

    #[test]
    fn test_class_string_defaults_to_handle() {
        let ctx = context(Some(Arc::new(FixedContainer { method: "handle" })));
        let callable = materialize(&ListenerRef::class("Reports"), &ctx).unwrap();
        assert_eq!(invoke(&callable).unwrap(), Some(json!("handle")));
    }

    #[test]
    fn test_class_method_syntax_selects_method() {
        let ctx = context(Some(Arc::new(FixedContainer { method: "send" })));
        let callable = materialize(&ListenerRef::class("Reports@send"), &ctx).unwrap();
        assert_eq!(invoke(&callable).unwrap(), Some(json!("send")));
    }

    #[test]
    fn test_missing_method_falls_back_to_invoke() {
        let ctx = context(Some(Arc::new(FixedContainer { method: INVOKE_METHOD })));
        let callable = materialize(&ListenerRef::class("Reports"), &ctx).unwrap();
        assert_eq!(invoke(&callable).unwrap(), Some(json!("invoke")));
    }

    #[test]
    fn test_no_handle_and_no_invoke_is_unsupported() {
        let ctx = context(Some(Arc::new(FixedContainer { method: "elsewhere" })));
        let result = materialize(&ListenerRef::class("Foo"), &ctx);
        assert!(matches!(result, Err(DispatchError::UnsupportedListener(_))));
    }

    #[test]
    fn test_class_listener_without_container_fails_fast() {
        let result = materialize(&ListenerRef::class("Reports"), &context(None));
        assert!(matches!(
            result,
            Err(DispatchError::MissingCollaborator("container"))
        ));
    }

    struct RecordingManager {
        callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    }

    impl RecordingManager {
        fn new() -> Self {
            Self {
                callbacks: Mutex::new(Vec::new()),
            }
        }

        fn commit(&self) {
            let callbacks: Vec<_> = self.callbacks.lock().unwrap().drain(..).collect();
            for callback in callbacks {
                callback();
            }
        }
    }

    impl TransactionManager for RecordingManager {
        fn add_callback(&self, callback: Box<dyn FnOnce() + Send>) {
            self.callbacks.lock().unwrap().push(callback);
        }
    }

    struct CountingListener {
        calls: Arc<Mutex<usize>>,
    }

    impl EventListener for CountingListener {
        fn call(&self, _method: &str, _event: &dyn Event, _payload: &[Value]) -> Result<Response> {
            *self.calls.lock().unwrap() += 1;
            Ok(None)
        }

        fn responds_to(&self, method: &str) -> bool {
            method == HANDLE_METHOD
        }

        fn after_commit(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_after_commit_listener_runs_on_commit_only() {
        let calls = Arc::new(Mutex::new(0));
        let instance: Arc<dyn EventListener> = Arc::new(CountingListener { calls: calls.clone() });
        let manager = Arc::new(RecordingManager::new());

        let resolver_manager = manager.clone();
        let callable = after_commit_listener(
            instance,
            HANDLE_METHOD.to_string(),
            Arc::new(move || {
                Some(resolver_manager.clone() as Arc<dyn TransactionManager>)
            }),
        );

        assert_eq!(invoke(&callable).unwrap(), None);
        assert_eq!(*calls.lock().unwrap(), 0);

        manager.commit();
        assert_eq!(*calls.lock().unwrap(), 1);

        // Callbacks are consumed; a second commit does not rerun them.
        manager.commit();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_after_commit_listener_runs_inline_without_active_transaction() {
        let calls = Arc::new(Mutex::new(0));
        let instance: Arc<dyn EventListener> = Arc::new(CountingListener { calls: calls.clone() });

        let callable =
            after_commit_listener(instance, HANDLE_METHOD.to_string(), Arc::new(|| None));

        invoke(&callable).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    struct AfterCommitContainer {
        calls: Arc<Mutex<usize>>,
    }

    impl Container for AfterCommitContainer {
        fn make_listener(&self, _class: &str) -> Result<Arc<dyn EventListener>> {
            Ok(Arc::new(CountingListener { calls: self.calls.clone() }))
        }

        fn make_subscriber(&self, class: &str) -> Result<Arc<dyn Subscriber>> {
            Err(DispatchError::ResolutionFailed {
                class: class.to_string(),
                reason: "no subscribers here".to_string(),
            })
        }
    }

    #[test]
    fn test_after_commit_listener_without_resolver_fails_fast() {
        let calls = Arc::new(Mutex::new(0));
        let ctx = context(Some(Arc::new(AfterCommitContainer { calls })));

        let result = materialize(&ListenerRef::class("AuditTrail"), &ctx);
        assert!(matches!(
            result,
            Err(DispatchError::MissingCollaborator("transaction manager resolver"))
        ));
    }
}
