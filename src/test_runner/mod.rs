//! Test correlation bridge
//!
//! Scripts declare tests with `cx.test(name, body)`. A synchronous body
//! reports as soon as it returns. A body declared with a completion
//! callback ("done") is asynchronous: its outcome is whichever comes first
//! of the callback being invoked or the body throwing synchronously, and
//! the test stays open as tracked work until then.
//!
//! Each test produces at most one [`AssertionRecord`], delivered as an
//! `execution.assertion` event tagged with the execution and the test.
//!
//! ```no_run
//! use sandbox_settle::sandbox::{Sandbox, SandboxConfig};
//! use sandbox_settle::test_runner::TestBody;
//! use sandbox_settle::Value;
//!
//! let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
//! sandbox
//!     .run(|cx| {
//!         cx.test(
//!             "one test",
//!             TestBody::with_done(|cx, done| {
//!                 cx.resolved(Value::from("test")).then(cx, move |cx, _result| {
//!                     done.pass(cx);
//!                     Ok(Value::Undefined)
//!                 });
//!                 Ok(Value::Undefined)
//!             }),
//!         );
//!         Ok(Value::Undefined)
//!     })
//!     .unwrap();
//! ```

use crate::runtime::value::{Completion, Value};
use crate::sandbox::{normalize, ErrorRecord, ExecutionContext, ExecutionEvent, PendingKind, TestMeta, Token};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

// ---------------------------------------------------------------------------
// AssertionRecord
// ---------------------------------------------------------------------------

/// Outcome of one test body, as it crosses to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRecord {
    /// Whether the test passed
    pub passed: bool,
    /// Whether the test body declared a completion callback
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl AssertionRecord {
    /// A passing record
    pub fn pass(is_async: bool) -> Self {
        Self {
            passed: true,
            is_async,
            error: None,
        }
    }

    /// A failing record carrying the normalized failure value
    pub fn fail(is_async: bool, error: ErrorRecord) -> Self {
        Self {
            passed: false,
            is_async,
            error: Some(error),
        }
    }
}

impl fmt::Display for AssertionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.passed) {
            (_, true) => write!(f, "PASSED"),
            (Some(error), false) => write!(f, "FAILED: {}: {}", error.name, error.message),
            (None, false) => write!(f, "FAILED"),
        }
    }
}

// ---------------------------------------------------------------------------
// TestBody
// ---------------------------------------------------------------------------

type SyncBody = Box<dyn FnOnce(&mut ExecutionContext) -> Completion>;
type DoneBody = Box<dyn FnOnce(&mut ExecutionContext, DoneCallback) -> Completion>;

/// A test body.
pub enum TestBody {
    /// Completes when it returns; a throw is a failure
    Sync(SyncBody),
    /// Completes when its completion callback is invoked
    WithDone(DoneBody),
}

impl TestBody {
    /// A body that completes when it returns
    pub fn sync<F>(body: F) -> Self
    where
        F: FnOnce(&mut ExecutionContext) -> Completion + 'static,
    {
        TestBody::Sync(Box::new(body))
    }

    /// A body that declares a completion callback
    pub fn with_done<F>(body: F) -> Self
    where
        F: FnOnce(&mut ExecutionContext, DoneCallback) -> Completion + 'static,
    {
        TestBody::WithDone(Box::new(body))
    }

    /// Whether the body is asynchronous
    pub fn is_async(&self) -> bool {
        matches!(self, TestBody::WithDone(_))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestBody::Sync(_) => write!(f, "TestBody::Sync"),
            TestBody::WithDone(_) => write!(f, "TestBody::WithDone"),
        }
    }
}

// ---------------------------------------------------------------------------
// DoneCallback
// ---------------------------------------------------------------------------

/// State shared by one asynchronous test invocation
#[derive(Debug)]
struct TestInvocation {
    meta: TestMeta,
    token: Option<Token>,
    reported: Cell<bool>,
}

impl TestInvocation {
    /// Emit `record` unless an earlier outcome already did, then release the
    /// test's tracked work.
    fn report(&self, cx: &mut ExecutionContext, record: AssertionRecord, source: &'static str) {
        if self.reported.replace(true) {
            debug!(test = %self.meta.name, source, "ignoring outcome of already reported test");
            return;
        }
        debug!(test = %self.meta.name, passed = record.passed, source, "test reported");
        cx.emit(ExecutionEvent::ExecutionAssertion {
            execution: cx.id(),
            test: self.meta.clone(),
            assertions: vec![record],
        });
        if let Some(token) = self.token {
            cx.registry().borrow_mut().close(token);
        }
    }
}

/// The completion callback handed to an asynchronous test body.
///
/// Cloning shares the same test; only the first outcome counts.
#[derive(Debug, Clone)]
pub struct DoneCallback {
    invocation: Rc<TestInvocation>,
}

impl DoneCallback {
    /// `done(arg)`: a truthy argument fails the test with the normalized
    /// argument, anything else passes it
    pub fn call(&self, cx: &mut ExecutionContext, arg: Value) {
        let record = if arg.to_boolean() {
            AssertionRecord::fail(true, normalize(&arg))
        } else {
            AssertionRecord::pass(true)
        };
        self.invocation.report(cx, record, "completion callback");
    }

    /// `done()`
    pub fn pass(&self, cx: &mut ExecutionContext) {
        self.call(cx, Value::Undefined);
    }

    /// `done(error)`
    pub fn fail(&self, cx: &mut ExecutionContext, error: Value) {
        self.call(cx, error);
    }

    /// Whether this test has produced its record
    pub fn has_reported(&self) -> bool {
        self.invocation.reported.get()
    }

    /// The test this callback belongs to
    pub fn test(&self) -> &TestMeta {
        &self.invocation.meta
    }
}

// ---------------------------------------------------------------------------
// run_test
// ---------------------------------------------------------------------------

/// Run one test body against `cx`.
///
/// Throws from the body never escape: they become the test's failure.
pub fn run_test(cx: &mut ExecutionContext, name: &str, body: TestBody) {
    let meta = TestMeta {
        name: name.to_string(),
        index: cx.next_test_index(),
    };

    match body {
        TestBody::Sync(body) => {
            let record = match body(cx) {
                Ok(_) => AssertionRecord::pass(false),
                Err(thrown) => AssertionRecord::fail(false, normalize(&thrown)),
            };
            debug!(test = %meta.name, passed = record.passed, "synchronous test finished");
            cx.emit(ExecutionEvent::ExecutionAssertion {
                execution: cx.id(),
                test: meta,
                assertions: vec![record],
            });
        }
        TestBody::WithDone(body) => {
            let token = cx.track(PendingKind::AsyncTest);
            let done = DoneCallback {
                invocation: Rc::new(TestInvocation {
                    meta,
                    token,
                    reported: Cell::new(false),
                }),
            };
            if let Err(thrown) = body(cx, done.clone()) {
                let record = AssertionRecord::fail(true, normalize(&thrown));
                done.invocation.report(cx, record, "synchronous throw");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::logged_context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_done_without_argument_passes() {
        let (mut cx, log) = logged_context();
        cx.test(
            "one test",
            TestBody::with_done(|cx, done| {
                cx.resolved(Value::from("test")).then(cx, move |cx, _result| {
                    done.pass(cx);
                    Ok(Value::Undefined)
                });
                Ok(Value::Undefined)
            }),
        );
        assert!(log.assertions().is_empty());
        cx.run_until_idle();

        let assertions = log.assertions();
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].1, vec![AssertionRecord::pass(true)]);
        assert!(log.errors().is_empty());
        assert_eq!(cx.pending_operations(), 0);
    }

    #[test]
    fn test_done_with_error_fails() {
        let (mut cx, log) = logged_context();
        cx.test(
            "failing",
            TestBody::with_done(|cx, done| {
                cx.resolved(Value::from("Catch me if you can"))
                    .then(cx, move |cx, msg| {
                        done.fail(cx, Value::error(&msg.to_js_string()));
                        Ok(Value::Undefined)
                    });
                Ok(Value::Undefined)
            }),
        );
        cx.run_until_idle();
        assert_eq!(
            log.assertions()[0].1,
            vec![AssertionRecord::fail(true, ErrorRecord::generic("Catch me if you can"))]
        );
    }

    #[test]
    fn test_falsy_argument_passes() {
        let (mut cx, log) = logged_context();
        cx.test(
            "falsy",
            TestBody::with_done(|cx, done| {
                done.call(cx, Value::Null);
                Ok(Value::Undefined)
            }),
        );
        assert_eq!(log.assertions()[0].1, vec![AssertionRecord::pass(true)]);
    }

    #[test]
    fn test_never_called_produces_nothing() {
        let (mut cx, log) = logged_context();
        cx.test(
            "hangs",
            TestBody::with_done(|cx, _done| {
                cx.resolved(Value::from("test")).then(cx, |_cx, _result| Ok(Value::Undefined));
                Ok(Value::Undefined)
            }),
        );
        cx.run_until_idle();
        assert!(log.events().is_empty());
        // The test itself is still outstanding
        assert_eq!(cx.pending_operations(), 1);
    }

    #[test]
    fn test_sync_throw_preempts_later_done() {
        let (mut cx, log) = logged_context();
        cx.test(
            "one test",
            TestBody::with_done(|cx, done| {
                cx.resolved(Value::from("Catch me if you can"))
                    .then(cx, move |cx, msg| {
                        done.fail(cx, Value::error(&msg.to_js_string()));
                        Ok(Value::Undefined)
                    });
                Err(Value::error("there is no right way to do something wrong"))
            }),
        );
        assert_eq!(log.assertions().len(), 1);
        cx.run_until_idle();

        let assertions = log.assertions();
        assert_eq!(assertions.len(), 1);
        assert_eq!(
            assertions[0].1,
            vec![AssertionRecord::fail(
                true,
                ErrorRecord::generic("there is no right way to do something wrong")
            )]
        );
        assert!(log.errors().is_empty());
    }

    #[test]
    fn test_second_done_is_ignored() {
        let (mut cx, log) = logged_context();
        cx.test(
            "twice",
            TestBody::with_done(|cx, done| {
                done.pass(cx);
                assert!(done.has_reported());
                done.fail(cx, Value::error("too late"));
                Ok(Value::Undefined)
            }),
        );
        assert_eq!(log.assertions().len(), 1);
        assert_eq!(log.assertions()[0].1, vec![AssertionRecord::pass(true)]);
    }

    #[test]
    fn test_sync_bodies_report_immediately() {
        let (mut cx, log) = logged_context();
        cx.test("ok", TestBody::sync(|_cx| Ok(Value::Undefined)));
        cx.test("bad", TestBody::sync(|_cx| Err(Value::from("nope"))));

        let assertions = log.assertions();
        assert_eq!(assertions[0].0, TestMeta { name: "ok".into(), index: 0 });
        assert_eq!(assertions[0].1, vec![AssertionRecord::pass(false)]);
        assert_eq!(assertions[1].0.index, 1);
        assert_eq!(assertions[1].1, vec![AssertionRecord::fail(false, ErrorRecord::generic("nope"))]);
        assert_eq!(cx.pending_operations(), 0);
    }

    #[test]
    fn test_async_test_holds_a_token() {
        let (mut cx, _log) = logged_context();
        cx.test("open", TestBody::with_done(|_cx, _done| Ok(Value::Undefined)));
        let outstanding = cx.outstanding_operations();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].1.kind, PendingKind::AsyncTest);
    }

    #[test]
    fn test_record_wire_shape() {
        let record = AssertionRecord::fail(true, ErrorRecord::generic("m"));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "passed": false,
                "async": true,
                "error": { "type": "Error", "name": "Error", "message": "m" }
            })
        );
        assert_eq!(
            serde_json::to_value(AssertionRecord::pass(false)).unwrap(),
            serde_json::json!({ "passed": true, "async": false })
        );
        assert_eq!(record.to_string(), "FAILED: Error: m");
    }
}
