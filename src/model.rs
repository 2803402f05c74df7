//! Core data model.
//!
//! A task is a deferred call: a function name resolved through the
//! [`Registrar`](crate::registrar::Registrar) plus an opaque argument payload.
//! Every execution attempt leaves behind an immutable invocation record.

pub mod invocation;
pub mod task;

pub use invocation::{Invocation, InvocationId};
pub use task::{Task, TaskId, TaskStatus, is_ready};
