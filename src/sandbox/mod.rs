//! Script Execution Sandbox
//!
//! Runs scripts against an isolated [`ExecutionContext`] and reports each
//! execution's result exactly once, after every piece of tracked
//! asynchronous work the script started has finished.
//!
//! A script is a closure over the context's script-facing surface:
//! `new_promise`, `resolved`, `rejected`, continuation registration on the
//! returned [`AsyncValue`]s, `set_timeout` / `clear_timeout` and `test`.
//!
//! ```no_run
//! use sandbox_settle::sandbox::{Sandbox, SandboxConfig};
//! use sandbox_settle::Value;
//!
//! let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
//! let result = sandbox
//!     .run(|cx| {
//!         let message = cx.resolved(Value::from("test"));
//!         message.then(cx, |_cx, _result| Ok(Value::Undefined));
//!         Ok(Value::Undefined)
//!     })
//!     .unwrap();
//! assert!(result.is_async);
//! ```

mod arbiter;
mod config;
mod events;
mod intercept;
mod normalize;
mod registry;
mod watchdog;

pub use arbiter::{ArbiterState, CompletionArbiter};
pub use config::SandboxConfig;
pub use events::{Emitter, EventLog, ExecutionEvent, ExecutionId, Listener, TestMeta};
pub use intercept::{InterceptingConstructor, NativeConstructor, PromiseConstructor, TrackedPromise};
pub use normalize::{normalize, ErrorRecord};
pub use registry::{PendingEntry, PendingKind, PendingRegistry, RegistryHandle, Token};
pub use watchdog::Watchdog;

use crate::error::{Error, ResourceLimitKind, Result};
use crate::event_loop::{EventLoop, EventLoopStats, Task, TimerId};
use crate::runtime::promise::{AsyncValue, NativePromise, PromiseId, PromiseState, Resolvers, Thenable};
use crate::runtime::value::{Completion, Value};
use crate::test_runner::{self, TestBody};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// A task queued on an execution's event loop
pub type Job = Task<ExecutionContext>;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Isolated state of one script execution.
///
/// Owns the event loop, the pending-operation registry and the installed
/// promise constructor. Nothing here outlives the execution.
pub struct ExecutionContext {
    id: ExecutionId,
    event_loop: EventLoop<ExecutionContext>,
    registry: RegistryHandle,
    constructor: Box<dyn PromiseConstructor>,
    emitter: Rc<Emitter>,
    report_unhandled_rejections: bool,
    rejections: Vec<NativePromise>,
    timer_tokens: HashMap<TimerId, Token>,
    next_promise_id: PromiseId,
    next_test_index: usize,
}

impl ExecutionContext {
    /// Create a context; `config.intercept_async` picks the installed
    /// constructor.
    pub fn new(id: ExecutionId, config: &SandboxConfig, emitter: Rc<Emitter>) -> Self {
        let registry = PendingRegistry::new_handle();
        let constructor: Box<dyn PromiseConstructor> = if config.intercept_async {
            Box::new(InterceptingConstructor::new(registry.clone()))
        } else {
            Box::new(NativeConstructor)
        };
        Self {
            id,
            event_loop: EventLoop::new(),
            registry,
            constructor,
            emitter,
            report_unhandled_rejections: config.report_unhandled_rejections,
            rejections: Vec::new(),
            timer_tokens: HashMap::default(),
            next_promise_id: 1,
            next_test_index: 0,
        }
    }

    /// Id of the execution this context belongs to
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Current virtual time in milliseconds
    pub fn current_time(&self) -> u64 {
        self.event_loop.current_time()
    }

    /// Number of tracked operations still outstanding
    pub fn pending_operations(&self) -> usize {
        self.registry.borrow().size()
    }

    /// Outstanding tracked operations in creation order
    pub fn outstanding_operations(&self) -> Vec<(Token, PendingEntry)> {
        self.registry.borrow().outstanding()
    }

    /// Whether continuation registrations are being tracked
    pub fn is_intercepting(&self) -> bool {
        self.constructor.is_intercepting()
    }

    /// Event loop counters
    pub fn loop_stats(&self) -> EventLoopStats {
        self.event_loop.stats()
    }

    // --- script surface ---------------------------------------------------

    /// `new Promise(executor)`. An executor that throws rejects the promise
    /// unless it already resolved it.
    pub fn new_promise<F>(&mut self, executor: F) -> AsyncValue
    where
        F: FnOnce(&mut ExecutionContext, Resolvers) -> Completion,
    {
        let (promise, resolvers) = self.create_pending();
        if let Err(thrown) = executor(self, resolvers.clone()) {
            resolvers.reject(self, thrown);
        }
        promise
    }

    /// `Promise.resolve(value)`; an asynchronous value is returned as is
    pub fn resolved(&mut self, value: Value) -> AsyncValue {
        if let Value::Promise(promise) = value {
            return promise;
        }
        let (promise, resolvers) = self.create_pending();
        resolvers.resolve(self, value);
        promise
    }

    /// `Promise.reject(reason)`
    pub fn rejected(&mut self, reason: Value) -> AsyncValue {
        let (promise, resolvers) = self.create_pending();
        resolvers.reject(self, reason);
        promise
    }

    /// `setTimeout(callback, delay)`. The armed timer counts as tracked
    /// work until one tick after its callback ran. A throwing callback is
    /// reported as an `execution.error`.
    pub fn set_timeout<F>(&mut self, delay: u64, callback: F) -> TimerId
    where
        F: FnOnce(&mut ExecutionContext) -> Completion + 'static,
    {
        let token = self.track(PendingKind::Timer);
        let id = self.event_loop.schedule_timer(
            delay,
            Box::new(move |cx: &mut ExecutionContext| {
                if let Some(token) = token {
                    cx.timer_tokens.retain(|_, open| *open != token);
                }
                if let Err(thrown) = callback(cx) {
                    cx.report_uncaught(&thrown);
                }
                if let Some(token) = token {
                    cx.retire_later(token);
                }
            }),
        );
        if let Some(token) = token {
            self.timer_tokens.insert(id, token);
        }
        id
    }

    /// `clearTimeout(id)`. Cancelling an armed timer retires its token;
    /// anything else is ignored.
    pub fn clear_timeout(&mut self, id: TimerId) {
        if !self.event_loop.cancel_timer(id) {
            debug!(execution = %self.id, timer = id, "ignoring clear of inactive timer");
            return;
        }
        if let Some(token) = self.timer_tokens.remove(&id) {
            self.registry.borrow_mut().close(token);
        }
    }

    /// `test(name, body)`: run a test body and report its outcome
    pub fn test(&mut self, name: &str, body: TestBody) {
        test_runner::run_test(self, name, body);
    }

    // --- engine plumbing --------------------------------------------------

    /// Build a pending promise through the installed constructor
    pub(crate) fn create_pending(&mut self) -> (AsyncValue, Resolvers) {
        let id = self.next_promise_id;
        self.next_promise_id += 1;
        let native = NativePromise::new(id);
        let promise = self.constructor.wrap(native.clone());
        (promise, Resolvers::new(native))
    }

    pub(crate) fn queue_microtask(&mut self, job: Job) {
        self.event_loop.queue_microtask(job);
    }

    pub(crate) fn set_immediate(&mut self, job: Job) {
        self.event_loop.set_immediate(job);
    }

    /// Remember a promise that rejected with no handler attached
    pub(crate) fn track_rejection(&mut self, promise: NativePromise) {
        self.rejections.push(promise);
    }

    pub(crate) fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Open a token when interception is on
    pub(crate) fn track(&mut self, kind: PendingKind) -> Option<Token> {
        if !self.constructor.is_intercepting() {
            return None;
        }
        Some(self.registry.borrow_mut().open(kind))
    }

    /// Close `token` one tick from now
    pub(crate) fn retire_later(&mut self, token: Token) {
        let registry = self.registry.clone();
        self.set_immediate(Box::new(move |_cx: &mut ExecutionContext| {
            registry.borrow_mut().close(token);
        }));
    }

    pub(crate) fn next_test_index(&mut self) -> usize {
        let index = self.next_test_index;
        self.next_test_index += 1;
        index
    }

    pub(crate) fn emit(&self, event: ExecutionEvent) {
        self.emitter.emit(&event);
    }

    /// Report a value thrown outside any test body
    pub(crate) fn report_uncaught(&self, thrown: &Value) -> ErrorRecord {
        let error = normalize(thrown);
        debug!(execution = %self.id, message = %error.message, "uncaught script error");
        self.emit(ExecutionEvent::ExecutionError {
            execution: self.id,
            error: error.clone(),
        });
        error
    }

    /// Report every rejection that is still unhandled, once each
    fn flush_unhandled_rejections(&mut self) {
        let candidates = std::mem::take(&mut self.rejections);
        if !self.report_unhandled_rejections {
            return;
        }
        for promise in candidates {
            if promise.is_handled() {
                continue;
            }
            if let PromiseState::Rejected(reason) = promise.state() {
                debug!(execution = %self.id, promise = promise.id(), "unhandled rejection");
                self.report_uncaught(&reason);
            }
        }
    }

    /// Run the loop until the arbiter settles or the watchdog steps in.
    /// Returns the limit that tore the execution down, if any.
    fn drive(&mut self, arbiter: &mut CompletionArbiter, watchdog: &mut Watchdog) -> Option<ResourceLimitKind> {
        if !self.event_loop.has_pending_microtasks() {
            self.flush_unhandled_rejections();
        }
        loop {
            let Some(job) = self.event_loop.next_task() else {
                if !self.event_loop.advance_to_next_timer(watchdog.deadline()) {
                    self.event_loop.advance_to(watchdog.deadline());
                }
                if let Some(kind) = watchdog.check_time(self.current_time()) {
                    self.tear_down();
                    return Some(kind);
                }
                continue;
            };
            if let Some(kind) = watchdog.record_task() {
                self.tear_down();
                return Some(kind);
            }
            job(self);
            if !self.event_loop.has_pending_microtasks() {
                self.flush_unhandled_rejections();
                if arbiter.on_progress(self.pending_operations()) {
                    return None;
                }
            }
        }
    }

    /// Run queued microtasks to exhaustion, then report unhandled
    /// rejections. Used when the execution settles synchronously.
    fn settle_microtasks(&mut self, watchdog: &mut Watchdog) -> Option<ResourceLimitKind> {
        while self.event_loop.has_pending_microtasks() {
            if let Some(kind) = watchdog.record_task() {
                self.tear_down();
                return Some(kind);
            }
            let Some(job) = self.event_loop.next_task() else {
                break;
            };
            job(self);
        }
        self.flush_unhandled_rejections();
        None
    }

    /// Drop every queued task and forget outstanding work. Emits nothing.
    fn tear_down(&mut self) {
        let outstanding = self.registry.borrow().size();
        if outstanding > 0 {
            debug!(execution = %self.id, outstanding, "discarding outstanding tracked work");
        }
        self.event_loop.clear();
        self.rejections.clear();
        self.timer_tokens.clear();
        *self.registry.borrow_mut() = PendingRegistry::new();
    }

    /// Drain the loop, firing timers as they come due (unit tests)
    #[cfg(test)]
    pub(crate) fn run_until_idle(&mut self) {
        loop {
            while let Some(job) = self.event_loop.next_task() {
                job(self);
            }
            if !self.event_loop.advance_to_next_timer(u64::MAX) {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// What the host receives once per execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Execution id; matches the `execution` field of its events
    pub id: ExecutionId,
    /// Value the synchronous body returned (`null` when it threw)
    pub value: serde_json::Value,
    /// Fixed when the synchronous body returned; never revised
    pub is_async: bool,
    /// The top-level throw, if the synchronous body threw
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Set when the watchdog tore the execution down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ResourceLimitKind>,
}

impl ExecutionResult {
    /// Turn a watchdog teardown into an error
    pub fn into_completed(self) -> Result<Self> {
        match self.terminated {
            Some(kind) => Err(Error::resource_limit(
                kind,
                format!("execution {} was torn down before its asynchronous work finished", self.id),
            )),
            None => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Host-side entry point: configuration, listeners and execution ids.
///
/// Every `execute` call gets a fresh [`ExecutionContext`]; executions
/// share nothing but the listeners.
pub struct Sandbox {
    config: SandboxConfig,
    emitter: Rc<Emitter>,
    next_execution: u64,
}

impl Sandbox {
    /// Create a new sandbox from the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            emitter: Rc::new(Emitter::new()),
            next_execution: 1,
        })
    }

    /// Access the sandbox configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Register an event listener for all later executions
    pub fn on_event<F>(&mut self, listener: F)
    where
        F: FnMut(&ExecutionEvent) + 'static,
    {
        self.emitter.subscribe(Box::new(listener));
    }

    /// Run `script` and hand its result to `on_result`, exactly once
    pub fn execute<S, F>(&mut self, script: S, on_result: F)
    where
        S: FnOnce(&mut ExecutionContext) -> Completion,
        F: FnOnce(Result<ExecutionResult>),
    {
        on_result(self.run(script));
    }

    /// Run `script` and return its result
    pub fn run<S>(&mut self, script: S) -> Result<ExecutionResult>
    where
        S: FnOnce(&mut ExecutionContext) -> Completion,
    {
        let id = ExecutionId(self.next_execution);
        self.next_execution += 1;

        let mut cx = ExecutionContext::new(id, &self.config, self.emitter.clone());
        let mut arbiter = CompletionArbiter::new(id);
        let mut watchdog = Watchdog::new(&self.config, cx.current_time());
        info!(execution = %id, intercept = cx.is_intercepting(), "starting execution");

        let (value, error) = match script(&mut cx) {
            Ok(value) => (value.to_json(), None),
            Err(thrown) => (serde_json::Value::Null, Some(cx.report_uncaught(&thrown))),
        };

        let terminated = match arbiter.on_sync_return(cx.pending_operations())? {
            ArbiterState::AwaitingAsync => cx.drive(&mut arbiter, &mut watchdog),
            _ => cx.settle_microtasks(&mut watchdog),
        };

        let is_async = match terminated {
            Some(kind) => {
                warn!(execution = %id, %kind, "execution torn down by watchdog");
                arbiter.is_async().unwrap_or(true)
            }
            None => arbiter.finalize()?,
        };
        cx.tear_down();
        info!(execution = %id, is_async, tasks = watchdog.tasks_run(), "execution finished");

        Ok(ExecutionResult {
            id,
            value,
            is_async,
            error,
            terminated,
        })
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------
