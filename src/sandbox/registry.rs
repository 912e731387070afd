//! Pending operation registry
//!
//! Counts the tracked asynchronous work an execution still has outstanding.
//! One registry exists per execution; it is created with the execution
//! context and dropped with it.

use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Opaque identifier of one outstanding unit of tracked work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Token(u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a token stands for. Diagnostics only; the registry treats all
/// kinds the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    /// A continuation registered on an asynchronous value
    Continuation,
    /// An armed timer
    Timer,
    /// An asynchronous test waiting for its completion callback
    AsyncTest,
}

/// Bookkeeping kept per open token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    /// Creation order within the execution
    pub seq: u64,
    /// Kind of work
    pub kind: PendingKind,
}

/// Registry of outstanding tracked operations
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: HashMap<Token, PendingEntry>,
    next_seq: u64,
    opened: u64,
    closed: u64,
}

/// Shared handle to an execution's registry
pub type RegistryHandle = Rc<RefCell<PendingRegistry>>;

impl PendingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry behind a shared handle
    pub fn new_handle() -> RegistryHandle {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Mint a token for a new unit of work
    pub fn open(&mut self, kind: PendingKind) -> Token {
        let seq = self.next_seq;
        self.next_seq += 1;
        let token = Token(seq);
        self.entries.insert(token, PendingEntry { seq, kind });
        self.opened += 1;
        trace!(%token, ?kind, pending = self.entries.len(), "opened pending operation");
        token
    }

    /// Retire a token. Closing an unknown or already closed token does
    /// nothing.
    pub fn close(&mut self, token: Token) {
        match self.entries.remove(&token) {
            Some(entry) => {
                self.closed += 1;
                trace!(%token, kind = ?entry.kind, pending = self.entries.len(), "closed pending operation");
            }
            None => debug!(%token, "ignoring close of unknown pending operation"),
        }
    }

    /// Number of outstanding tokens
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether a token is still outstanding
    pub fn is_open(&self, token: Token) -> bool {
        self.entries.contains_key(&token)
    }

    /// Outstanding entries in creation order
    pub fn outstanding(&self) -> Vec<(Token, PendingEntry)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(t, e)| (*t, *e)).collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
    }

    /// Total tokens minted so far
    pub fn total_opened(&self) -> u64 {
        self.opened
    }

    /// Total tokens retired so far
    pub fn total_closed(&self) -> u64 {
        self.closed
    }
}
