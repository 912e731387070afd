//! Execution events
//!
//! Events are the only channel through which asynchronous failures and test
//! outcomes reach the host. Each event carries the id of the execution that
//! produced it, so listeners shared across executions can correlate them.

use super::normalize::ErrorRecord;
use crate::test_runner::AssertionRecord;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// Identifier of one `execute` call on a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a test within an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMeta {
    /// Test name as given by the script
    pub name: String,
    /// Zero-based position among the execution's tests
    pub index: usize,
}

/// An event emitted by a running execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ExecutionEvent {
    /// A script-level error nobody handled
    #[serde(rename = "execution.error")]
    ExecutionError {
        execution: ExecutionId,
        error: ErrorRecord,
    },
    /// Outcome of one test body
    #[serde(rename = "execution.assertion")]
    ExecutionAssertion {
        execution: ExecutionId,
        test: TestMeta,
        assertions: Vec<AssertionRecord>,
    },
}

impl ExecutionEvent {
    /// The execution that emitted this event
    pub fn execution(&self) -> ExecutionId {
        match self {
            ExecutionEvent::ExecutionError { execution, .. }
            | ExecutionEvent::ExecutionAssertion { execution, .. } => *execution,
        }
    }
}

/// Event listener callback
pub type Listener = Box<dyn FnMut(&ExecutionEvent)>;

/// Fan-out of events to registered listeners
#[derive(Default)]
pub struct Emitter {
    listeners: RefCell<Vec<Listener>>,
}

impl Emitter {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Listener) {
        self.listeners.borrow_mut().push(listener);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver an event to every listener, in registration order
    pub fn emit(&self, event: &ExecutionEvent) {
        let Ok(mut listeners) = self.listeners.try_borrow_mut() else {
            warn!(execution = %event.execution(), "dropping event emitted from inside a listener");
            return;
        };
        for listener in listeners.iter_mut() {
            listener(event);
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Records every event it sees; handy for hosts that inspect events after
/// an execution instead of reacting to them
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<ExecutionEvent>>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener appending to this log
    pub fn listener(&self) -> Listener {
        let events = self.events.clone();
        Box::new(move |event: &ExecutionEvent| events.borrow_mut().push(event.clone()))
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.borrow().clone()
    }

    /// Recorded `execution.error` payloads
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::ExecutionError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded `execution.assertion` payloads
    pub fn assertions(&self) -> Vec<(TestMeta, Vec<AssertionRecord>)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::ExecutionAssertion { test, assertions, .. } => {
                    Some((test.clone(), assertions.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}
