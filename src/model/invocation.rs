//! Invocation records: one per execution attempt, written once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskId;

/// The outcome of one attempt to perform a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: InvocationId,

    /// The task this attempt ran. Many invocations may share one task.
    pub task_id: TaskId,

    /// True iff the performer completed without error.
    pub result: bool,

    /// Failure detail. Only set when `result` is false.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id: InvocationId::new(),
            task_id,
            result: false,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pass(&mut self) {
        self.result = true;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.result = false;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }
}

/// Newtype for invocation IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
