//! Task records, their status vocabulary and the readiness predicate.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier. Exactly one record exists per id in a store.
    pub id: TaskId,

    /// Key resolved against the registrar to find a converter.
    pub func_name: String,

    /// Opaque payload handed to the converter. The engine never inspects it.
    pub args: Vec<u8>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Earliest instant the task may run. `None` means as soon as it is pending.
    pub run_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task that is eligible immediately.
    pub fn new(func_name: impl Into<String>, args: impl Into<Vec<u8>>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            func_name: func_name.into(),
            args: args.into(),
            status: TaskStatus::Pending,
            run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending task whose arguments are `args` encoded as JSON.
    pub fn with_json_args<T: Serialize>(func_name: impl Into<String>, args: &T) -> Result<Self> {
        let func_name = func_name.into();
        let payload = serde_json::to_vec(args)
            .map_err(|e| Error::Other(format!("encode args for {func_name}: {e}")))?;
        Ok(Self::new(func_name, payload))
    }

    /// Defer the task by `delay`, measured from its creation time.
    pub fn delay(mut self, delay: Duration) -> Self {
        let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        self.run_at = Some(
            self.created_at
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        self
    }

    /// Defer the task until an absolute instant.
    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    /// Decode the argument payload as JSON.
    ///
    /// Intended for converters; a decoding failure is a conversion failure.
    pub fn json_args<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.args)
            .map_err(|e| Error::Conversion(format!("malformed args for {}: {e}", self.func_name)))
    }

    /// Ready means pending and not scheduled for a later instant than `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.run_at.is_none_or(|at| at <= now)
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Move to `to`, refreshing `updated_at`. Rejects transitions the
    /// lifecycle does not allow.
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Readiness predicate evaluated against the current clock. Pure: it never
/// mutates the task.
pub fn is_ready(task: &Task) -> bool {
    task.is_ready()
}

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// A nil id is treated as "not yet assigned" by stores.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// First 8 characters, for listings.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Other(format!("invalid task id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a processor, execution in progress.
    Running,
    /// Performed successfully. Terminal.
    Passed,
    /// Conversion or execution failed. Terminal.
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Passed)
                | (Running, Failed)
                | (Running, Pending) // claimed but never assigned, handed back on shutdown
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Passed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "passed" => Ok(TaskStatus::Passed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::Other(format!("unknown task status: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_and_ready() {
        let task = Task::new("noop", Vec::new());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.run_at.is_none());
        assert!(!task.id.is_nil());
        assert!(is_ready(&task));
    }

    #[test]
    fn non_pending_tasks_are_never_ready() {
        for status in [TaskStatus::Running, TaskStatus::Passed, TaskStatus::Failed] {
            let mut task = Task::new("noop", Vec::new());
            task.status = status;
            assert!(!task.is_ready(), "{status} task reported ready");
        }
    }

    #[test]
    fn future_run_at_is_not_ready_until_it_passes() {
        let task = Task::new("noop", Vec::new()).delay(Duration::from_secs(60));
        let run_at = task.run_at.unwrap();

        assert!(!task.is_ready());
        assert!(!task.is_ready_at(run_at - TimeDelta::milliseconds(1)));
        assert!(task.is_ready_at(run_at));
        assert!(task.is_ready_at(run_at + TimeDelta::seconds(1)));
    }

    #[test]
    fn delay_is_measured_from_creation() {
        let task = Task::new("noop", Vec::new()).delay(Duration::from_millis(500));
        assert_eq!(
            task.run_at.unwrap() - task.created_at,
            TimeDelta::milliseconds(500)
        );
    }

    #[test]
    fn readiness_check_does_not_mutate() {
        let task = Task::new("noop", Vec::new());
        let before = task.clone();
        let _ = task.is_ready();
        assert_eq!(task, before);
    }

    #[test]
    fn json_args_round_trip_and_malformed_payload() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Args {
            to: String,
        }

        let task = Task::with_json_args(
            "email",
            &Args {
                to: "ops@example.com".into(),
            },
        )
        .unwrap();
        let args: Args = task.json_args().unwrap();
        assert_eq!(args.to, "ops@example.com");

        let broken = Task::new("email", b"not json".to_vec());
        let err = broken.json_args::<Args>().unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut task = Task::new("noop", Vec::new());
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Passed).unwrap();
        assert!(task.status.is_terminal());

        let err = task.transition(TaskStatus::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Passed));
    }

    #[test]
    fn status_parses_its_display_form() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Passed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("queued".parse::<TaskStatus>().is_err());
    }
}
