//! Persistence boundary.
//!
//! The processor only ever talks to these traits. A backend supplies one
//! [`TaskStore`] and one [`InvocationStore`] through the aggregate [`Store`].
//! Backends own their concurrency discipline; the processor relies on exactly
//! two guarantees: [`TaskStore::get_one`] claims exclusively, and `save` is an
//! upsert keyed by id.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Invocation, Task, TaskId};

pub use memory::MemoryStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Atomically select one ready task, persist it as `Running` and return it.
    ///
    /// A given task id must never be handed to two concurrent callers.
    /// Returns [`Error::NoPendingTasks`](crate::error::Error::NoPendingTasks)
    /// when nothing is ready.
    async fn get_one(&self) -> Result<Task>;

    /// All tasks currently in `Pending` status. For inspection only.
    async fn pending(&self) -> Result<Vec<Task>>;

    /// Look up a task, failing with `NotFound` if absent.
    async fn by_id(&self, id: TaskId) -> Result<Task>;

    /// Upsert by id, refreshing `updated_at`. Returns the stored record.
    async fn save(&self, task: &Task) -> Result<Task>;
}

#[async_trait]
pub trait InvocationStore: Send + Sync {
    /// Every invocation recorded for `task_id`, oldest first.
    ///
    /// Fails with `NotFound` if the task is unknown to the store.
    async fn all_by_task(&self, task_id: TaskId) -> Result<Vec<Invocation>>;

    /// Upsert by id. `created_at` is set when the record is first stored.
    async fn save(&self, invocation: &Invocation) -> Result<Invocation>;
}

/// A backend: one task store and one invocation store.
pub trait Store: Send + Sync {
    fn tasks(&self) -> &dyn TaskStore;
    fn invocations(&self) -> &dyn InvocationStore;
}
