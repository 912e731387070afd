//! sandbox-settle: completion tracking for sandboxed scripts
//!
//! A script's synchronous body can return long before the asynchronous
//! work it started has finished. This crate runs scripts in an isolated
//! [`ExecutionContext`], counts every continuation they register, and
//! reports each execution's result exactly once, after that work is done.
//!
//! # Quick Start
//!
//! ```no_run
//! use sandbox_settle::{Sandbox, SandboxConfig, Value};
//!
//! fn main() -> sandbox_settle::Result<()> {
//!     let mut sandbox = Sandbox::new(SandboxConfig::default())?;
//!     sandbox.on_event(|event| println!("{:?}", event));
//!     let result = sandbox.run(|cx| {
//!         cx.resolved(Value::from("x")).then(cx, |_cx, v| Ok(v));
//!         Ok(Value::Undefined)
//!     })?;
//!     assert!(result.is_async);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`sandbox`], [`test_runner`] |
//! | **Runtime** | [`runtime`], [`event_loop`] |
//! | **Host** | [`scenarios`], [`error`](Error) |
// Clippy configuration.
//
// - type_complexity: continuation and task types are nested boxed closures
#![allow(clippy::type_complexity)]

pub mod event_loop;
pub mod runtime;
pub mod sandbox;
pub mod scenarios;
pub mod test_runner;

mod error;

pub use error::{Error, ErrorKind, ResourceLimitKind, Result};
pub use runtime::{AsyncValue, Completion, Value};
pub use sandbox::{ExecutionContext, ExecutionEvent, ExecutionResult, Sandbox, SandboxConfig};
pub use test_runner::{AssertionRecord, TestBody};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
