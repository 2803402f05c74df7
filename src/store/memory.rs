//! In-process store. Everything lives behind one async mutex, so a claim is
//! trivially exclusive. Useful for tests and single-process embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{InvocationStore, Store, TaskStore};
use crate::error::{Error, Result};
use crate::model::{Invocation, InvocationId, Task, TaskId, TaskStatus};

#[derive(Default)]
struct State {
    /// Insertion order is kept so listings are stable.
    tasks: Vec<Task>,
    invocations: Vec<Invocation>,
    by_task: HashMap<TaskId, Vec<usize>>,
}

impl State {
    fn task_index(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn tasks(&self) -> &dyn TaskStore {
        self
    }

    fn invocations(&self) -> &dyn InvocationStore {
        self
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_one(&self) -> Result<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        // Earliest effective run time first; creation time breaks ties.
        let next = state
            .tasks
            .iter_mut()
            .filter(|t| t.is_ready_at(now))
            .min_by_key(|t| (t.run_at.unwrap_or(t.created_at), t.created_at))
            .ok_or(Error::NoPendingTasks)?;

        next.status = TaskStatus::Running;
        next.updated_at = now;
        Ok(next.clone())
    }

    async fn pending(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect())
    }

    async fn by_id(&self, id: TaskId) -> Result<Task> {
        let state = self.state.lock().await;
        state
            .task_index(id)
            .map(|i| state.tasks[i].clone())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn save(&self, task: &Task) -> Result<Task> {
        let mut stored = task.clone();
        if stored.id.is_nil() {
            stored.id = TaskId::new();
        }
        stored.updated_at = Utc::now();

        let mut state = self.state.lock().await;
        match state.task_index(stored.id) {
            Some(i) => state.tasks[i] = stored.clone(),
            None => state.tasks.push(stored.clone()),
        }
        Ok(stored)
    }
}

#[async_trait]
impl InvocationStore for MemoryStore {
    async fn all_by_task(&self, task_id: TaskId) -> Result<Vec<Invocation>> {
        let state = self.state.lock().await;
        match state.by_task.get(&task_id) {
            Some(indexes) => Ok(indexes
                .iter()
                .map(|&i| state.invocations[i].clone())
                .collect()),
            None if state.task_index(task_id).is_some() => Ok(Vec::new()),
            None => Err(Error::NotFound(format!("task {task_id}"))),
        }
    }

    async fn save(&self, invocation: &Invocation) -> Result<Invocation> {
        let mut stored = invocation.clone();
        if stored.id.is_nil() {
            stored.id = InvocationId::new();
        }
        let now = Utc::now();
        stored.updated_at = now;

        let mut state = self.state.lock().await;
        let existing = state.invocations.iter().position(|i| i.id == stored.id);
        match existing {
            Some(i) => {
                stored.created_at = state.invocations[i].created_at;
                state.invocations[i] = stored.clone();
            }
            None => {
                stored.created_at = now;
                state.invocations.push(stored.clone());
                let index = state.invocations.len() - 1;
                state.by_task.entry(stored.task_id).or_default().push(index);
            }
        }
        Ok(stored)
    }
}
