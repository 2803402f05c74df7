//! Task execution span helpers.

use tracing::Span;

use crate::model::TaskId;

/// Start a span covering one invocation of a task.
///
/// The `task.status` field is declared empty and is filled in by
/// [`record_state_transition`].
pub fn start_task_span(func_name: &str, task_id: &TaskId) -> Span {
    tracing::info_span!(
        "task.invoke",
        "task.func_name" = func_name,
        "task.id" = %task_id,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an `info` event in it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("task.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
