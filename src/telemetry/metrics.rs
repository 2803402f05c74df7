//! Metric instrument factories for deferral.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"deferral"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for deferral instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("deferral")
}

/// Counter: tasks written by the scheduler.
/// Labels: `func_name`.
pub fn tasks_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("deferral.tasks.scheduled")
        .with_description("Number of tasks scheduled")
        .build()
}

/// Counter: tasks claimed by the poller.
/// Labels: `func_name`.
pub fn tasks_claimed() -> Counter<u64> {
    meter()
        .u64_counter("deferral.tasks.claimed")
        .with_description("Number of tasks claimed from the store")
        .build()
}

/// Counter: task status transitions recorded by the engine.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("deferral.tasks.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: unexpected store errors while polling for work.
pub fn poll_errors() -> Counter<u64> {
    meter()
        .u64_counter("deferral.poll.errors")
        .with_description("Store errors encountered by the poller")
        .build()
}

/// Counter: records that could not be saved after all retries.
/// Labels: `record` ("task" | "invocation").
pub fn persistence_failures() -> Counter<u64> {
    meter()
        .u64_counter("deferral.persistence.failures")
        .with_description("Records that could not be persisted")
        .build()
}

/// Counter: claimed tasks handed back to the store on shutdown.
pub fn tasks_requeued() -> Counter<u64> {
    meter()
        .u64_counter("deferral.tasks.requeued")
        .with_description("Claimed tasks returned to pending on shutdown")
        .build()
}

/// Histogram: time spent converting and performing a task, in milliseconds.
/// Labels: `func_name`.
pub fn invoke_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("deferral.invoke.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
