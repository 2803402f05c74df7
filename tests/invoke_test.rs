//! Tests for the single-task execution protocol, including stores that fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deferral::engine::{ProcessorConfig, invoke};
use deferral::error::{Error, Result};
use deferral::model::{Invocation, Task, TaskId, TaskStatus};
use deferral::registrar::{FnPerformer, PerformError, Performer, Registrar};
use deferral::store::{InvocationStore, MemoryStore, Store, TaskStore};

fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        save_retry_delay: Duration::from_millis(1),
        ..ProcessorConfig::default()
    }
}

fn test_registrar() -> Registrar {
    let registrar = Registrar::new();
    registrar.register("noop", |_task: &Task| {
        Ok(FnPerformer::new(|| async { Ok::<(), PerformError>(()) }))
    });
    registrar
}

async fn claimed(store: &dyn Store, func_name: &str) -> Task {
    store.tasks().save(&Task::new(func_name, Vec::new())).await.unwrap();
    store.tasks().get_one().await.unwrap()
}

/// Wraps a [`MemoryStore`] and fails a configurable number of saves.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    task_save_failures: AtomicU32,
    invocation_save_failures: AtomicU32,
}

fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Store for FlakyStore {
    fn tasks(&self) -> &dyn TaskStore {
        self
    }

    fn invocations(&self) -> &dyn InvocationStore {
        self
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn get_one(&self) -> Result<Task> {
        self.inner.tasks().get_one().await
    }

    async fn pending(&self) -> Result<Vec<Task>> {
        self.inner.tasks().pending().await
    }

    async fn by_id(&self, id: TaskId) -> Result<Task> {
        self.inner.tasks().by_id(id).await
    }

    async fn save(&self, task: &Task) -> Result<Task> {
        if take_failure(&self.task_save_failures) {
            return Err(Error::Other("task table unavailable".into()));
        }
        self.inner.tasks().save(task).await
    }
}

#[async_trait]
impl InvocationStore for FlakyStore {
    async fn all_by_task(&self, task_id: TaskId) -> Result<Vec<Invocation>> {
        self.inner.invocations().all_by_task(task_id).await
    }

    async fn save(&self, invocation: &Invocation) -> Result<Invocation> {
        if take_failure(&self.invocation_save_failures) {
            return Err(Error::Other("invocation table unavailable".into()));
        }
        self.inner.invocations().save(invocation).await
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_perform_passes_and_records_one_invocation() {
    let store = MemoryStore::new();
    let task = claimed(&store, "noop").await;

    let execution = invoke(&store, &test_registrar(), task.clone(), &test_config())
        .await
        .unwrap();

    assert!(execution.persisted);
    assert_eq!(execution.task.status, TaskStatus::Passed);
    assert!(execution.invocation.result);

    let invocations = store.invocations().all_by_task(task.id).await.unwrap();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].id, execution.invocation.id);
    assert_eq!(
        store.tasks().by_id(task.id).await.unwrap().status,
        TaskStatus::Passed
    );
}

#[tokio::test]
async fn missing_converter_fails_task() {
    let store = MemoryStore::new();
    let task = claimed(&store, "missing").await;

    let execution = invoke(&store, &test_registrar(), task.clone(), &test_config())
        .await
        .unwrap();

    assert_eq!(execution.task.status, TaskStatus::Failed);
    assert!(!execution.invocation.result);
    assert!(
        execution
            .invocation
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no converter"))
    );
    assert_eq!(
        store.tasks().by_id(task.id).await.unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn converter_error_fails_task() {
    let store = MemoryStore::new();
    let registrar = Registrar::new();
    registrar.register("picky", |_task: &Task| {
        Err::<Unbuildable, PerformError>("unsupported payload".into())
    });
    let task = claimed(&store, "picky").await;

    let execution = invoke(&store, &registrar, task, &test_config())
        .await
        .unwrap();

    assert_eq!(execution.task.status, TaskStatus::Failed);
    assert_eq!(
        execution.invocation.error.as_deref(),
        Some("unsupported payload")
    );
}

struct Unbuildable;

#[async_trait]
impl Performer for Unbuildable {
    async fn perform(&mut self) -> std::result::Result<(), PerformError> {
        Ok(())
    }
}

#[tokio::test]
async fn panicking_converter_is_recorded_as_failure() {
    let store = MemoryStore::new();
    let registrar = Registrar::new();
    registrar.register("fragile", |task: &Task| {
        if task.args.is_empty() {
            panic!("converter needs args");
        }
        Ok(Unbuildable)
    });
    let task = claimed(&store, "fragile").await;

    let execution = invoke(&store, &registrar, task.clone(), &test_config())
        .await
        .unwrap();

    assert!(execution.persisted);
    assert_eq!(execution.task.status, TaskStatus::Failed);
    let detail = execution.invocation.error.unwrap();
    assert!(detail.contains("converter panicked"), "{detail}");
    assert!(detail.contains("converter needs args"), "{detail}");
    assert_eq!(store.invocations().all_by_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unclaimed_task_is_rejected_without_running() {
    let store = MemoryStore::new();
    let ran = Arc::new(AtomicBool::new(false));
    let registrar = Registrar::new();
    {
        let ran = Arc::clone(&ran);
        registrar.register("noop", move |_task: &Task| {
            let ran = Arc::clone(&ran);
            Ok(FnPerformer::new(move || async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<(), PerformError>(())
            }))
        });
    }
    let task = store
        .tasks()
        .save(&Task::new("noop", Vec::new()))
        .await
        .unwrap();

    let err = invoke(&store, &registrar, task.clone(), &test_config())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidTransition { .. }), "{err}");
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(
        store.tasks().by_id(task.id).await.unwrap().status,
        TaskStatus::Pending
    );
    assert!(store.invocations().all_by_task(task.id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Persistence failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_save_failures_are_retried() {
    let store = FlakyStore::default();
    let task = claimed(&store, "noop").await;
    store.task_save_failures.store(2, Ordering::SeqCst);
    store.invocation_save_failures.store(1, Ordering::SeqCst);

    let execution = invoke(&store, &test_registrar(), task.clone(), &test_config())
        .await
        .unwrap();

    assert!(execution.persisted);
    assert_eq!(
        store.tasks().by_id(task.id).await.unwrap().status,
        TaskStatus::Passed
    );
    assert_eq!(store.invocations().all_by_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_save_failure_keeps_outcome_in_memory() {
    let store = FlakyStore {
        invocation_save_failures: AtomicU32::new(u32::MAX),
        ..FlakyStore::default()
    };
    let task = claimed(&store, "noop").await;

    let execution = invoke(&store, &test_registrar(), task.clone(), &test_config())
        .await
        .unwrap();

    assert!(!execution.persisted);
    assert_eq!(execution.task.status, TaskStatus::Passed);
    assert!(execution.invocation.result);
    // The task save went through; only the invocation was lost.
    assert_eq!(
        store.tasks().by_id(task.id).await.unwrap().status,
        TaskStatus::Passed
    );
    assert!(store.invocations().all_by_task(task.id).await.unwrap().is_empty());
}
