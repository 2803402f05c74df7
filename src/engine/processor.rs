//! The processor: one poller, one dispatcher and a fixed pool of workers.
//!
//! The three roles share no state; they talk over channels.
//!
//! ```text
//! store --get_one--> poller --handoff--> dispatcher --slot--> worker --invoke--> store
//!                                            ^                  |
//!                                            +---- idle slot ---+
//! ```
//!
//! An idle worker announces itself by sending a fresh oneshot slot over the
//! idle channel; the dispatcher pairs the next claimed task with the next
//! announced slot. Work is therefore never queued at a busy worker.
//!
//! Shutdown is a single broadcast. The poller stops claiming, the dispatcher
//! stops assigning, and every worker finishes what it holds before sending an
//! acknowledgment. A task that was claimed but never reached a worker is put
//! back to `Pending`.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use super::invoke::invoke;
use crate::error::{Error, Result};
use crate::model::{Task, TaskStatus};
use crate::registrar::Registrar;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::telemetry::metrics;

/// Configuration for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of workers in the pool.
    pub workers: usize,
    /// How long the poller sleeps when the store has nothing ready.
    pub poll_interval: Duration,
    /// Attempts per record when saving an execution outcome.
    pub save_attempts: u32,
    /// Pause between save attempts.
    pub save_retry_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_interval: Duration::from_secs(1),
            save_attempts: 3,
            save_retry_delay: Duration::from_millis(100),
        }
    }
}

impl ProcessorConfig {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("processor needs at least one worker".into()));
        }
        if self.save_attempts == 0 {
            return Err(Error::Config("save_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// What [`Processor::shutdown`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that acknowledged the shutdown.
    pub acknowledged: usize,
    /// Claimed tasks handed back to the store as `Pending`.
    pub requeued: usize,
}

struct DispatchReport {
    acknowledged: usize,
    requeued: usize,
}

/// A running processor. Dropping it signals shutdown without waiting;
/// call [`Processor::shutdown`] to drain.
pub struct Processor {
    scheduler: Scheduler,
    shutdown: CancellationToken,
    poller: JoinHandle<usize>,
    dispatcher: JoinHandle<DispatchReport>,
    _guard: DropGuard,
}

impl Processor {
    /// Spawn the poller, the dispatcher and `config.workers` workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        store: Arc<dyn Store>,
        registrar: Arc<Registrar>,
        config: ProcessorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let config = Arc::new(config);

        // Capacity 1: the poller claims a task only once the previous one
        // has been picked up by the dispatcher.
        let (task_tx, task_rx) = mpsc::channel::<Task>(1);
        let (idle_tx, idle_rx) = mpsc::channel::<oneshot::Sender<Task>>(config.workers);
        let (ack_tx, ack_rx) = mpsc::channel::<usize>(config.workers);

        for worker in 0..config.workers {
            tokio::spawn(work(
                worker,
                idle_tx.clone(),
                ack_tx.clone(),
                Arc::clone(&store),
                Arc::clone(&registrar),
                Arc::clone(&config),
                shutdown.clone(),
            ));
        }
        drop(idle_tx);
        drop(ack_tx);

        let dispatcher = tokio::spawn(dispatch(
            task_rx,
            idle_rx,
            ack_rx,
            config.workers,
            Arc::clone(&store),
            shutdown.clone(),
        ));

        let poller = tokio::spawn(poll(
            Arc::clone(&store),
            task_tx,
            config.poll_interval,
            shutdown.clone(),
        ));

        info!(
            workers = config.workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "processor started"
        );

        Ok(Self {
            scheduler: Scheduler::new(store),
            _guard: shutdown.clone().drop_guard(),
            shutdown,
            poller,
            dispatcher,
        })
    }

    /// Enqueue a task through the processor's store.
    pub async fn schedule(&self, task: Task) -> Result<Task> {
        self.scheduler.schedule(task).await
    }

    /// A scheduler bound to the same store, for handing to producers.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Signal shutdown and wait until every worker has acknowledged.
    ///
    /// Tasks already running are allowed to finish. A task blocked inside
    /// `get_one` is waited for and then handed back.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        info!("processor shutting down");
        self.shutdown.cancel();

        let poller_requeued = self
            .poller
            .await
            .map_err(|e| Error::Other(format!("poller task failed: {e}")))?;
        let report = self
            .dispatcher
            .await
            .map_err(|e| Error::Other(format!("dispatcher task failed: {e}")))?;

        let report = ShutdownReport {
            acknowledged: report.acknowledged,
            requeued: report.requeued + poller_requeued,
        };
        info!(
            acknowledged = report.acknowledged,
            requeued = report.requeued,
            "processor stopped"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

async fn poll(
    store: Arc<dyn Store>,
    tasks: mpsc::Sender<Task>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> usize {
    let mut requeued = 0;
    debug!("poller started");

    while !shutdown.is_cancelled() {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = tasks.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // Not raced against shutdown: a claim in flight is allowed to finish.
        match store.tasks().get_one().await {
            Ok(task) => {
                metrics::tasks_claimed()
                    .add(1, &[KeyValue::new("func_name", task.func_name.clone())]);
                if shutdown.is_cancelled() {
                    drop(permit);
                    if requeue(store.as_ref(), task).await {
                        requeued += 1;
                    }
                    break;
                }
                debug!(task_id = %task.id, func_name = %task.func_name, "task claimed");
                permit.send(task);
            }
            Err(e) if e.is_no_pending() => {
                drop(permit);
                idle(poll_interval, &shutdown).await;
            }
            Err(e) => {
                drop(permit);
                error!(error = %e, "failed to claim task");
                metrics::poll_errors().add(1, &[]);
                idle(poll_interval, &shutdown).await;
            }
        }
    }

    debug!("poller stopped");
    requeued
}

async fn idle(interval: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(interval) => {}
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

async fn dispatch(
    mut tasks: mpsc::Receiver<Task>,
    mut idle: mpsc::Receiver<oneshot::Sender<Task>>,
    mut acks: mpsc::Receiver<usize>,
    workers: usize,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
) -> DispatchReport {
    let mut requeued = 0;
    debug!("dispatcher started");

    'dispatch: loop {
        let mut task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = tasks.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if requeue(store.as_ref(), task).await {
                        requeued += 1;
                    }
                    break 'dispatch;
                }
                slot = idle.recv() => match slot {
                    Some(slot) => match slot.send(task) {
                        Ok(()) => break,
                        // The worker stopped waiting; offer it to the next one.
                        Err(returned) => task = returned,
                    },
                    None => {
                        warn!(task_id = %task.id, "no workers left to take task");
                        if requeue(store.as_ref(), task).await {
                            requeued += 1;
                        }
                        break 'dispatch;
                    }
                },
            }
        }
    }

    // Anything still sitting in the handoff was claimed but never assigned.
    tasks.close();
    while let Some(task) = tasks.recv().await {
        if requeue(store.as_ref(), task).await {
            requeued += 1;
        }
    }

    let mut acknowledged = 0;
    while acknowledged < workers {
        match acks.recv().await {
            Some(worker) => {
                debug!(worker, "worker acknowledged shutdown");
                acknowledged += 1;
            }
            None => break,
        }
    }

    debug!(acknowledged, requeued, "dispatcher stopped");
    DispatchReport {
        acknowledged,
        requeued,
    }
}

/// Put a claimed task back to `Pending` so another processor can take it.
async fn requeue(store: &dyn Store, mut task: Task) -> bool {
    let id = task.id;
    if let Err(e) = task.transition(TaskStatus::Pending) {
        warn!(task_id = %id, error = %e, "cannot hand task back");
        return false;
    }

    match store.tasks().save(&task).await {
        Ok(_) => {
            info!(task_id = %id, "claimed task handed back to the store");
            metrics::tasks_requeued().add(1, &[]);
            true
        }
        Err(e) => {
            error!(task_id = %id, error = %e, "failed to hand claimed task back");
            metrics::persistence_failures().add(1, &[KeyValue::new("record", "task")]);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn work(
    worker: usize,
    idle: mpsc::Sender<oneshot::Sender<Task>>,
    acks: mpsc::Sender<usize>,
    store: Arc<dyn Store>,
    registrar: Arc<Registrar>,
    config: Arc<ProcessorConfig>,
    shutdown: CancellationToken,
) {
    debug!(worker, "worker started");

    loop {
        let (slot, mut assigned) = oneshot::channel::<Task>();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = idle.send(slot) => if sent.is_err() {
                break;
            },
        }

        let received = tokio::select! {
            biased;
            task = &mut assigned => task.ok(),
            _ = shutdown.cancelled() => None,
        };

        let task = match received {
            Some(task) => task,
            None => {
                // The dispatcher may have filled the slot just as shutdown
                // fired. Close it and take anything already delivered.
                assigned.close();
                match assigned.try_recv() {
                    Ok(task) => task,
                    Err(_) => break,
                }
            }
        };

        debug!(worker, task_id = %task.id, "task assigned");
        let task_id = task.id;
        match invoke(store.as_ref(), &registrar, task, &config).await {
            Ok(execution) if !execution.persisted => {
                warn!(worker, %task_id, "execution outcome not persisted");
            }
            Ok(_) => {}
            Err(e) => error!(worker, %task_id, error = %e, "task not invoked"),
        }
    }

    debug!(worker, "worker stopping");
    let _ = acks.send(worker).await;
}
