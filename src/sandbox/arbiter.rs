//! Completion arbiter
//!
//! Decides, once the script's synchronous body hands control back, whether
//! the execution is synchronous or has to wait for tracked asynchronous
//! work, and guards finalization.
//!
//! ```text
//! Running ──(pending == 0)──▶ Settled
//!    │                          ▲
//!    └─(pending > 0)─▶ AwaitingAsync ─(registry drained)─┘
//! ```
//!
//! The arbiter never times out on its own; an execution stuck in
//! `AwaitingAsync` is the watchdog's business.

use super::events::ExecutionId;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Arbiter states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArbiterState {
    /// The synchronous body has not returned yet
    Running,
    /// Tracked work was outstanding at the synchronous return
    AwaitingAsync,
    /// Terminal
    Settled,
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbiterState::Running => write!(f, "Running"),
            ArbiterState::AwaitingAsync => write!(f, "AwaitingAsync"),
            ArbiterState::Settled => write!(f, "Settled"),
        }
    }
}

/// Completion state machine for one execution
#[derive(Debug)]
pub struct CompletionArbiter {
    execution: ExecutionId,
    state: ArbiterState,
    is_async: Option<bool>,
    finalized: bool,
}

impl CompletionArbiter {
    /// Create an arbiter in the `Running` state
    pub fn new(execution: ExecutionId) -> Self {
        Self {
            execution,
            state: ArbiterState::Running,
            is_async: None,
            finalized: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// Whether the result is asynchronous; `None` until the synchronous
    /// body has returned. Never changes once set.
    pub fn is_async(&self) -> Option<bool> {
        self.is_async
    }

    /// Whether the result has been finalized
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The synchronous body returned with `pending` tracked operations
    /// outstanding. Allowed exactly once.
    pub fn on_sync_return(&mut self, pending: usize) -> Result<ArbiterState> {
        if self.state != ArbiterState::Running {
            return Err(Error::InvalidTransition {
                state: self.state,
                action: "observe the synchronous return",
            });
        }
        let is_async = pending > 0;
        self.is_async = Some(is_async);
        self.state = if is_async {
            ArbiterState::AwaitingAsync
        } else {
            ArbiterState::Settled
        };
        debug!(execution = %self.execution, pending, state = %self.state, "synchronous body returned");
        Ok(self.state)
    }

    /// Re-evaluate after the loop made progress. Returns `true` when this
    /// call moved the arbiter to `Settled`.
    pub fn on_progress(&mut self, pending: usize) -> bool {
        if self.state == ArbiterState::AwaitingAsync && pending == 0 {
            self.state = ArbiterState::Settled;
            debug!(execution = %self.execution, "tracked work drained, execution settled");
            return true;
        }
        false
    }

    /// Claim the right to report the result. Succeeds once, from
    /// `Settled`; a repeated call is rejected and logged.
    pub fn finalize(&mut self) -> Result<bool> {
        match self.state {
            ArbiterState::Settled if !self.finalized => {
                self.finalized = true;
                Ok(self.is_async.unwrap_or(false))
            }
            ArbiterState::Settled => {
                warn!(execution = %self.execution, "rejected second finalization");
                Err(Error::AlreadyFinalized(self.execution))
            }
            state => Err(Error::InvalidTransition {
                state,
                action: "finalize",
            }),
        }
    }
}
