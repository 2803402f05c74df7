//! # deferral
//!
//! Embeddable background-job engine.
//!
//! Callers schedule [`Task`](model::Task)s into a pluggable
//! [`Store`](store::Store). A [`Processor`](engine::Processor) polls the store
//! for ready tasks, hands each one to an idle worker, resolves its function
//! through the [`Registrar`](registrar::Registrar) and records the outcome as
//! an [`Invocation`](model::Invocation).

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod registrar;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use engine::{Processor, ProcessorConfig};
pub use error::{Error, Result};
pub use model::{Invocation, Task, TaskStatus};
pub use registrar::{Performer, Registrar};
pub use scheduler::Scheduler;
pub use store::{MemoryStore, Store};
