//! Execution protocol for a single claimed task.
//!
//! Resolve the converter, build the performer, run it, then record the
//! outcome on the task and on a fresh invocation. Both records are saved no
//! matter which branch was taken, including when the converter or performer
//! panics.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use super::processor::ProcessorConfig;
use crate::error::{Error, Result};
use crate::model::{Invocation, Task, TaskStatus};
use crate::registrar::Registrar;
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

/// What one call to [`invoke`] produced.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The task as last written, now `Passed` or `Failed`.
    pub task: Task,
    /// The invocation recorded for this attempt.
    pub invocation: Invocation,
    /// False if either record could not be saved after all retries.
    pub persisted: bool,
}

/// Run one claimed task to completion and persist the outcome.
///
/// The task must be `Running`, as returned by `TaskStore::get_one`. Any other
/// status is rejected with [`Error::InvalidTransition`] before the function is
/// resolved, and nothing is run or saved.
pub async fn invoke(
    store: &dyn Store,
    registrar: &Registrar,
    task: Task,
    config: &ProcessorConfig,
) -> Result<Execution> {
    if task.status != TaskStatus::Running {
        return Err(Error::InvalidTransition {
            from: task.status.to_string(),
            to: TaskStatus::Passed.to_string(),
        });
    }

    let span = start_task_span(&task.func_name, &task.id);

    async {
        let start = Instant::now();
        let mut task = task;
        let mut invocation = Invocation::new(task.id);
        let from = task.status;

        let outcome = perform(registrar, &task).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                task.transition(TaskStatus::Passed)?;
                invocation.pass();
                info!(task_id = %task.id, duration_ms, "task passed");
            }
            Err(e) => {
                task.transition(TaskStatus::Failed)?;
                invocation.fail(&e);
                warn!(task_id = %task.id, duration_ms, error = %e, "task failed");
            }
        }

        record_state_transition(&span, from.as_str(), task.status.as_str());
        metrics::task_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", task.status.as_str()),
            ],
        );
        metrics::invoke_duration_ms().record(
            duration_ms as f64,
            &[KeyValue::new("func_name", task.func_name.clone())],
        );

        let (task_ref, invocation_ref) = (&task, &invocation);
        let task_saved =
            save_with_retry("task", config, move || store.tasks().save(task_ref)).await;
        let invocation_saved = save_with_retry("invocation", config, move || {
            store.invocations().save(invocation_ref)
        })
        .await;

        let persisted = task_saved.is_some() && invocation_saved.is_some();
        Ok::<_, Error>(Execution {
            task: task_saved.unwrap_or(task),
            invocation: invocation_saved.unwrap_or(invocation),
            persisted,
        })
    }
    .instrument(span.clone())
    .await
}

/// Resolve and run the task's function. Every failure mode, panics included,
/// comes back as an error.
async fn perform(registrar: &Registrar, task: &Task) -> Result<()> {
    let converter = registrar.fetch(&task.func_name)?;

    let built = std::panic::catch_unwind(AssertUnwindSafe(|| converter(task)));
    let mut performer = match built {
        Ok(Ok(performer)) => performer,
        Ok(Err(e)) => return Err(Error::Conversion(e.to_string())),
        Err(panic) => {
            return Err(Error::Conversion(format!(
                "converter panicked: {}",
                panic_message(panic.as_ref())
            )));
        }
    };

    // Run on its own task so a panic unwinds there instead of through the worker.
    match tokio::spawn(async move { performer.perform().await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Perform(e.to_string())),
        Err(join) if join.is_panic() => Err(Error::Perform(format!(
            "performer panicked: {}",
            panic_message(join.into_panic().as_ref())
        ))),
        Err(join) => Err(Error::Perform(format!("performer aborted: {join}"))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Save a record, retrying up to `config.save_attempts` times. A final failure
/// is logged and counted; the caller's in-memory record is left as is.
async fn save_with_retry<T, F, Fut>(
    record: &'static str,
    config: &ProcessorConfig,
    mut save: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.save_attempts.max(1);
    for attempt in 1..=attempts {
        match save().await {
            Ok(saved) => return Some(saved),
            Err(e) if attempt < attempts => {
                warn!(record, attempt, error = %e, "save failed, retrying");
                tokio::time::sleep(config.save_retry_delay).await;
            }
            Err(e) => {
                error!(record, attempts, error = %e, "save failed, outcome not persisted");
                metrics::persistence_failures().add(1, &[KeyValue::new("record", record)]);
            }
        }
    }
    None
}
