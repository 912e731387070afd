//! Runtime values for sandboxed scripts
//!
//! The value model scripts compute with and the native promise every
//! script-visible asynchronous value is built on.

pub mod promise;
pub mod value;

pub use promise::{AsyncValue, NativePromise, PromiseId, PromiseState, Reaction, Resolvers, Thenable};
pub use value::{Completion, Object, ObjectKind, Value};
