//! Asynchronous-value interception
//!
//! The execution context builds every script-visible asynchronous value
//! through a [`PromiseConstructor`]. With interception enabled that
//! constructor hands out [`TrackedPromise`] adapters: they answer every
//! query from the native promise they wrap, but each `then` call mints a
//! registry token first and retires it one tick after the registered
//! continuation has run.
//!
//! The derived value a `then` returns is whatever the native registration
//! returned. It was itself built through the installed constructor, so
//! registrations on it are tracked the same way.

use super::registry::{PendingKind, RegistryHandle, Token};
use super::ExecutionContext;
use crate::runtime::promise::{AsyncValue, NativePromise, PromiseId, PromiseState, Reaction, Thenable};
use crate::runtime::value::Value;
use tracing::trace;

/// The script's asynchronous-value constructor
pub trait PromiseConstructor {
    /// Turn a freshly constructed native promise into the value the script
    /// receives
    fn wrap(&self, native: NativePromise) -> AsyncValue;

    /// Whether values from this constructor are tracked
    fn is_intercepting(&self) -> bool;
}

/// Hands out native promises unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeConstructor;

impl PromiseConstructor for NativeConstructor {
    fn wrap(&self, native: NativePromise) -> AsyncValue {
        AsyncValue::new(native)
    }

    fn is_intercepting(&self) -> bool {
        false
    }
}

/// Hands out [`TrackedPromise`] adapters bound to one execution's registry
pub struct InterceptingConstructor {
    registry: RegistryHandle,
}

impl InterceptingConstructor {
    /// Create a constructor counting registrations in `registry`
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }
}

impl PromiseConstructor for InterceptingConstructor {
    fn wrap(&self, native: NativePromise) -> AsyncValue {
        AsyncValue::new(TrackedPromise {
            inner: native,
            registry: self.registry.clone(),
        })
    }

    fn is_intercepting(&self) -> bool {
        true
    }
}

/// Adapter around a native promise that counts continuation registrations
pub struct TrackedPromise {
    inner: NativePromise,
    registry: RegistryHandle,
}

impl Thenable for TrackedPromise {
    fn id(&self) -> PromiseId {
        self.inner.id()
    }

    fn state(&self) -> PromiseState {
        self.inner.state()
    }

    fn is_handled(&self) -> bool {
        self.inner.is_handled()
    }

    fn then(
        &self,
        cx: &mut ExecutionContext,
        on_fulfilled: Option<Reaction>,
        on_rejected: Option<Reaction>,
    ) -> AsyncValue {
        let token = self.registry.borrow_mut().open(PendingKind::Continuation);
        trace!(promise = self.id(), %token, "tracking continuation registration");

        // A missing handler still gets a body, so the token is retired on
        // either settlement path.
        let on_fulfilled: Reaction = on_fulfilled
            .unwrap_or_else(|| Box::new(|_cx: &mut ExecutionContext, value: Value| Ok(value)));
        let on_rejected: Reaction = on_rejected
            .unwrap_or_else(|| Box::new(|_cx: &mut ExecutionContext, reason: Value| Err(reason)));

        self.inner.then(
            cx,
            Some(retire_after(token, on_fulfilled)),
            Some(retire_after(token, on_rejected)),
        )
    }

    fn is_tracked(&self) -> bool {
        true
    }
}

/// Run `body`, then queue the token's retirement as an immediate. The
/// immediate runs only after every microtask the body queued has drained.
fn retire_after(token: Token, body: Reaction) -> Reaction {
    Box::new(move |cx: &mut ExecutionContext, value| {
        let outcome = body(cx, value);
        cx.retire_later(token);
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::{native_context, tracked_context};

    #[test]
    fn test_construction_alone_opens_nothing() {
        let mut cx = tracked_context();
        let promise = cx.new_promise(|cx, resolvers| {
            resolvers.resolve(cx, Value::from("x"));
            Ok(Value::Undefined)
        });
        assert!(promise.is_tracked());
        assert_eq!(cx.pending_operations(), 0);
    }

    #[test]
    fn test_each_registration_gets_its_own_token() {
        let mut cx = tracked_context();
        let promise = cx.resolved(Value::from(1.0));
        promise.then(&mut cx, |_cx, v| Ok(v));
        promise.then(&mut cx, |_cx, v| Ok(v));
        assert_eq!(cx.pending_operations(), 2);

        cx.run_until_idle();
        assert_eq!(cx.pending_operations(), 0);
    }

    #[test]
    fn test_token_outlives_the_continuation_body() {
        let mut cx = tracked_context();
        let observed = std::rc::Rc::new(std::cell::Cell::new(usize::MAX));
        let seen = observed.clone();
        let promise = cx.resolved(Value::Undefined);
        promise.then(&mut cx, move |cx, v| {
            seen.set(cx.pending_operations());
            Ok(v)
        });
        cx.run_until_idle();
        // Still open while its own body runs
        assert_eq!(observed.get(), 1);
        assert_eq!(cx.pending_operations(), 0);
    }

    #[test]
    fn test_derived_values_are_tracked() {
        let mut cx = tracked_context();
        let derived = cx.resolved(Value::from("a")).then(&mut cx, |_cx, v| Ok(v));
        assert!(derived.is_tracked());
        derived.then(&mut cx, |_cx, v| Ok(v));
        assert_eq!(cx.pending_operations(), 2);
    }

    #[test]
    fn test_adapter_forwards_identity_and_state() {
        let mut cx = tracked_context();
        let promise = cx.rejected(Value::from("no"));
        let same = promise.clone();
        assert!(promise.same_value(&same));
        assert!(promise.state().is_rejected());
        assert!(Value::Promise(promise).strict_equals(&Value::Promise(same)));
    }

    #[test]
    fn test_rejection_without_handler_still_retires_token() {
        let mut cx = tracked_context();
        let rejected = cx.rejected(Value::from("boom"));
        let derived = rejected.then(&mut cx, |_cx, v| Ok(v));
        assert_eq!(cx.pending_operations(), 1);
        cx.run_until_idle();
        assert_eq!(cx.pending_operations(), 0);
        assert!(derived.state().is_rejected());
    }

    #[test]
    fn test_registration_on_pending_value_stays_open() {
        let mut cx = tracked_context();
        let never = cx.new_promise(|_cx, _resolvers| Ok(Value::Undefined));
        never.then(&mut cx, |_cx, v| Ok(v));
        cx.run_until_idle();
        assert_eq!(cx.pending_operations(), 1);
    }

    #[test]
    fn test_native_constructor_tracks_nothing() {
        let mut cx = native_context();
        let promise = cx.resolved(Value::from(1.0));
        promise.then(&mut cx, |_cx, v| Ok(v));
        assert!(!promise.is_tracked());
        assert_eq!(cx.pending_operations(), 0);
    }
}
