//! Write path for new work.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::debug;

use crate::error::Result;
use crate::model::Task;
use crate::store::Store;
use crate::telemetry::metrics;

/// Saves new tasks into a store. Performs no validation of its own.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist `task` so a processor can pick it up. Returns the stored record.
    pub async fn schedule(&self, task: Task) -> Result<Task> {
        let saved = self.store.tasks().save(&task).await?;
        metrics::tasks_scheduled().add(1, &[KeyValue::new("func_name", saved.func_name.clone())]);
        debug!(
            task_id = %saved.id,
            func_name = %saved.func_name,
            run_at = ?saved.run_at,
            "task scheduled"
        );
        Ok(saved)
    }
}
