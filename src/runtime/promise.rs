//! Promise Implementation
//!
//! The native asynchronous value scripts construct, plus the [`Thenable`]
//! capability interface every script-visible asynchronous value implements.
//! Scripts never hold a [`NativePromise`] directly: they hold an
//! [`AsyncValue`] produced by the execution's installed constructor, which
//! may be the native promise itself or an adapter around it.
//!
//! Reaction jobs run as microtasks on the execution's event loop. Promises
//! derived by `then` are created through the installed constructor too, so
//! whatever wrapping applies to `new Promise(...)` applies to them.

use super::value::{Completion, Value};
use crate::error::ErrorKind;
use crate::sandbox::ExecutionContext;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Identifier of a promise, unique within one execution
pub type PromiseId = u64;

/// A continuation body: receives the settled value, returns the value (or
/// thrown value) that settles the derived promise
pub type Reaction = Box<dyn FnOnce(&mut ExecutionContext, Value) -> Completion>;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Fulfilled with a value
    Fulfilled(Value),
    /// Rejected with a reason
    Rejected(Value),
}

impl PromiseState {
    /// Returns `true` while the promise is not settled
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }

    /// Returns `true` if rejected
    pub fn is_rejected(&self) -> bool {
        matches!(self, PromiseState::Rejected(_))
    }
}

/// Capability interface of a script-visible asynchronous value.
///
/// `then` is the continuation-registration operation. Everything else is
/// a query that adapters forward unchanged to the value they wrap.
pub trait Thenable {
    /// Identity of the underlying promise
    fn id(&self) -> PromiseId;

    /// Current state of the underlying promise
    fn state(&self) -> PromiseState;

    /// Whether any reaction was ever registered on the underlying promise
    fn is_handled(&self) -> bool;

    /// Register a continuation; returns the derived asynchronous value
    fn then(
        &self,
        cx: &mut ExecutionContext,
        on_fulfilled: Option<Reaction>,
        on_rejected: Option<Reaction>,
    ) -> AsyncValue;

    /// Whether registrations on this value are counted by a registry
    fn is_tracked(&self) -> bool {
        false
    }
}

struct PendingReaction {
    on_fulfilled: Option<Reaction>,
    on_rejected: Option<Reaction>,
    derived: Resolvers,
}

struct PromiseCell {
    id: PromiseId,
    state: PromiseState,
    reactions: Vec<PendingReaction>,
    handled: bool,
}

/// The underlying promise.
#[derive(Clone)]
pub struct NativePromise(Rc<RefCell<PromiseCell>>);

impl NativePromise {
    pub(crate) fn new(id: PromiseId) -> Self {
        NativePromise(Rc::new(RefCell::new(PromiseCell {
            id,
            state: PromiseState::Pending,
            reactions: Vec::new(),
            handled: false,
        })))
    }

    fn settle(&self, cx: &mut ExecutionContext, outcome: Completion) {
        let mut cell = self.0.borrow_mut();
        if !cell.state.is_pending() {
            return;
        }
        cell.state = match &outcome {
            Ok(value) => PromiseState::Fulfilled(value.clone()),
            Err(reason) => PromiseState::Rejected(reason.clone()),
        };
        let reactions = std::mem::take(&mut cell.reactions);
        let unhandled = outcome.is_err() && !cell.handled;
        drop(cell);

        if unhandled {
            cx.track_rejection(self.clone());
        }
        for reaction in reactions {
            enqueue_reaction(cx, reaction, outcome.clone());
        }
    }
}

impl Thenable for NativePromise {
    fn id(&self) -> PromiseId {
        self.0.borrow().id
    }

    fn state(&self) -> PromiseState {
        self.0.borrow().state.clone()
    }

    fn is_handled(&self) -> bool {
        self.0.borrow().handled
    }

    fn then(
        &self,
        cx: &mut ExecutionContext,
        on_fulfilled: Option<Reaction>,
        on_rejected: Option<Reaction>,
    ) -> AsyncValue {
        let (derived, resolvers) = cx.create_pending();
        let reaction = PendingReaction {
            on_fulfilled,
            on_rejected,
            derived: resolvers,
        };

        let mut cell = self.0.borrow_mut();
        cell.handled = true;
        let outcome = match cell.state.clone() {
            PromiseState::Pending => {
                cell.reactions.push(reaction);
                return derived;
            }
            PromiseState::Fulfilled(value) => Ok(value),
            PromiseState::Rejected(reason) => Err(reason),
        };
        drop(cell);

        enqueue_reaction(cx, reaction, outcome);
        derived
    }
}

fn enqueue_reaction(cx: &mut ExecutionContext, reaction: PendingReaction, outcome: Completion) {
    cx.queue_microtask(Box::new(move |cx: &mut ExecutionContext| {
        let PendingReaction {
            on_fulfilled,
            on_rejected,
            derived,
        } = reaction;
        let result = match outcome {
            Ok(value) => match on_fulfilled {
                Some(handler) => handler(cx, value),
                None => Ok(value),
            },
            Err(reason) => match on_rejected {
                Some(handler) => handler(cx, reason),
                None => Err(reason),
            },
        };
        match result {
            Ok(value) => derived.resolve(cx, value),
            Err(reason) => derived.reject(cx, reason),
        }
    }));
}

/// The `resolve` / `reject` pair handed to a promise executor.
///
/// Only the first call across both functions has any effect.
#[derive(Clone)]
pub struct Resolvers {
    promise: NativePromise,
    already_resolved: Rc<Cell<bool>>,
}

impl Resolvers {
    pub(crate) fn new(promise: NativePromise) -> Self {
        Self {
            promise,
            already_resolved: Rc::new(Cell::new(false)),
        }
    }

    /// Resolve the promise. Resolving with another asynchronous value adopts
    /// its eventual state by registering on it from a microtask.
    pub fn resolve(&self, cx: &mut ExecutionContext, value: Value) {
        if self.already_resolved.replace(true) {
            return;
        }
        match value {
            Value::Promise(inner) if inner.id() == self.promise.id() => {
                let cycle = Value::new_error(ErrorKind::TypeError, "Chaining cycle detected for promise");
                self.promise.settle(cx, Err(cycle));
            }
            Value::Promise(inner) => {
                let target = self.promise.clone();
                cx.queue_microtask(Box::new(move |cx: &mut ExecutionContext| {
                    let on_reject = target.clone();
                    inner.register(
                        cx,
                        Some(Box::new(move |cx: &mut ExecutionContext, value| {
                            target.settle(cx, Ok(value));
                            Ok(Value::Undefined)
                        })),
                        Some(Box::new(move |cx: &mut ExecutionContext, reason| {
                            on_reject.settle(cx, Err(reason));
                            Ok(Value::Undefined)
                        })),
                    );
                }));
            }
            other => self.promise.settle(cx, Ok(other)),
        }
    }

    /// Reject the promise
    pub fn reject(&self, cx: &mut ExecutionContext, reason: Value) {
        if self.already_resolved.replace(true) {
            return;
        }
        self.promise.settle(cx, Err(reason));
    }
}

/// A script-visible asynchronous value.
///
/// Cloning shares the same underlying value.
#[derive(Clone)]
pub struct AsyncValue(Rc<dyn Thenable>);

impl AsyncValue {
    /// Wrap any [`Thenable`] implementation
    pub fn new(inner: impl Thenable + 'static) -> Self {
        AsyncValue(Rc::new(inner))
    }

    /// Identity of the underlying promise
    pub fn id(&self) -> PromiseId {
        self.0.id()
    }

    /// Current state of the underlying promise
    pub fn state(&self) -> PromiseState {
        self.0.state()
    }

    /// Whether registrations on this value are tracked
    pub fn is_tracked(&self) -> bool {
        self.0.is_tracked()
    }

    /// Whether both values share the same underlying promise
    pub fn same_value(&self, other: &AsyncValue) -> bool {
        self.id() == other.id()
    }

    /// The raw continuation-registration operation
    pub fn register(
        &self,
        cx: &mut ExecutionContext,
        on_fulfilled: Option<Reaction>,
        on_rejected: Option<Reaction>,
    ) -> AsyncValue {
        self.0.then(cx, on_fulfilled, on_rejected)
    }

    /// `.then(onFulfilled)`
    pub fn then<F>(&self, cx: &mut ExecutionContext, on_fulfilled: F) -> AsyncValue
    where
        F: FnOnce(&mut ExecutionContext, Value) -> Completion + 'static,
    {
        self.register(cx, Some(Box::new(on_fulfilled)), None)
    }

    /// `.then(onFulfilled, onRejected)`
    pub fn then_or_else<F, R>(&self, cx: &mut ExecutionContext, on_fulfilled: F, on_rejected: R) -> AsyncValue
    where
        F: FnOnce(&mut ExecutionContext, Value) -> Completion + 'static,
        R: FnOnce(&mut ExecutionContext, Value) -> Completion + 'static,
    {
        self.register(cx, Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// `.catch(onRejected)`, defined through the registration operation
    pub fn catch<R>(&self, cx: &mut ExecutionContext, on_rejected: R) -> AsyncValue
    where
        R: FnOnce(&mut ExecutionContext, Value) -> Completion + 'static,
    {
        self.register(cx, None, Some(Box::new(on_rejected)))
    }
}

impl fmt::Debug for AsyncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::native_context;

    #[test]
    fn test_create_resolved_promise() {
        let mut cx = native_context();
        let promise = cx.resolved(Value::Number(42.0));
        assert!(matches!(promise.state(), PromiseState::Fulfilled(Value::Number(n)) if n == 42.0));
        assert!(!promise.is_tracked());
    }

    #[test]
    fn test_executor_throw_rejects() {
        let mut cx = native_context();
        let promise = cx.new_promise(|_cx, _resolvers| Err(Value::error("nope")));
        match promise.state() {
            PromiseState::Rejected(reason) => assert_eq!(reason.to_js_string(), "Error: nope"),
            other => panic!("Expected rejected promise, got {:?}", other),
        }
    }

    #[test]
    fn test_only_first_resolution_counts() {
        let mut cx = native_context();
        let promise = cx.new_promise(|cx, resolvers| {
            resolvers.resolve(cx, Value::from("first"));
            resolvers.reject(cx, Value::from("second"));
            resolvers.resolve(cx, Value::from("third"));
            Ok(Value::Undefined)
        });
        assert!(matches!(promise.state(), PromiseState::Fulfilled(Value::String(s)) if s == "first"));
    }

    #[test]
    fn test_then_runs_as_microtask() {
        let mut cx = native_context();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let promise = cx.resolved(Value::from("x"));
        let log = seen.clone();
        let derived = promise.then(&mut cx, move |_cx, value| {
            log.borrow_mut().push(value.to_js_string());
            Ok(Value::from("y"))
        });
        assert!(seen.borrow().is_empty());
        assert!(derived.state().is_pending());

        cx.run_until_idle();
        assert_eq!(*seen.borrow(), vec!["x".to_string()]);
        assert!(matches!(derived.state(), PromiseState::Fulfilled(Value::String(s)) if s == "y"));
    }

    #[test]
    fn test_throwing_reaction_rejects_only_its_link() {
        let mut cx = native_context();
        let source = cx.resolved(Value::from(1.0));
        let failing = source.then(&mut cx, |_cx, _v| Err(Value::error("link failed")));
        let sibling = source.then(&mut cx, |_cx, v| Ok(v));
        let recovered = failing.catch(&mut cx, |_cx, reason| Ok(Value::from(reason.to_js_string())));
        cx.run_until_idle();

        assert!(failing.state().is_rejected());
        assert!(matches!(sibling.state(), PromiseState::Fulfilled(Value::Number(n)) if n == 1.0));
        assert!(
            matches!(recovered.state(), PromiseState::Fulfilled(Value::String(s)) if s == "Error: link failed")
        );
    }

    #[test]
    fn test_resolve_with_promise_adopts_state() {
        let mut cx = native_context();
        let inner = cx.resolved(Value::from("inner"));
        let outer = cx.new_promise(move |cx, resolvers| {
            resolvers.resolve(cx, Value::Promise(inner));
            Ok(Value::Undefined)
        });
        assert!(outer.state().is_pending());
        cx.run_until_idle();
        assert!(matches!(outer.state(), PromiseState::Fulfilled(Value::String(s)) if s == "inner"));
    }

    #[test]
    fn test_chaining_cycle_is_type_error() {
        let mut cx = native_context();
        let slot: Rc<RefCell<Option<Resolvers>>> = Rc::new(RefCell::new(None));
        let captured = slot.clone();
        let promise = cx.new_promise(move |_cx, resolvers| {
            *captured.borrow_mut() = Some(resolvers);
            Ok(Value::Undefined)
        });
        let resolvers = slot.borrow_mut().take().unwrap();
        resolvers.resolve(&mut cx, Value::Promise(promise.clone()));
        match promise.state() {
            PromiseState::Rejected(reason) => {
                assert_eq!(reason.error_kind(), Some(ErrorKind::TypeError));
            }
            other => panic!("Expected rejected promise, got {:?}", other),
        }
    }

    #[test]
    fn test_then_without_handlers_passes_through() {
        let mut cx = native_context();
        let rejected = cx.rejected(Value::from("why"));
        let derived = rejected.register(&mut cx, None, None);
        cx.run_until_idle();
        assert!(matches!(derived.state(), PromiseState::Rejected(Value::String(s)) if s == "why"));
        assert!(rejected.0.is_handled());
    }
}
