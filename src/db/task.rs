//! Task persistence. Claims use `FOR UPDATE SKIP LOCKED`, so concurrent
//! processors, even in different processes, never claim the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Task, TaskId, TaskStatus};
use crate::store::TaskStore;

const TASK_COLUMNS: &str = "id, func_name, args, status, run_at, created_at, updated_at";

#[async_trait]
impl TaskStore for super::Db {
    async fn get_one(&self) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = 'running', updated_at = now()
             WHERE id = (
                 SELECT id FROM tasks
                 WHERE status = 'pending' AND (run_at IS NULL OR run_at <= now())
                 ORDER BY COALESCE(run_at, created_at), created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .fetch_optional(self.pool())
        .await?;

        row.ok_or(Error::NoPendingTasks)?.try_into_task()
    }

    async fn pending(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'pending'
             ORDER BY COALESCE(run_at, created_at), created_at"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn by_id(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn save(&self, task: &Task) -> Result<Task> {
        let id = if task.id.is_nil() { TaskId::new() } else { task.id };

        let row: TaskRow = sqlx::query_as(&format!(
            "INSERT INTO tasks (id, func_name, args, status, run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (id) DO UPDATE SET
                 func_name = EXCLUDED.func_name,
                 args = EXCLUDED.args,
                 status = EXCLUDED.status,
                 run_at = EXCLUDED.run_at,
                 updated_at = EXCLUDED.updated_at
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id.0)
        .bind(&task.func_name)
        .bind(&task.args)
        .bind(task.status.as_str())
        .bind(task.run_at)
        .bind(task.created_at)
        .fetch_one(self.pool())
        .await?;

        row.try_into_task()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    func_name: String,
    args: Vec<u8>,
    status: String,
    run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            func_name: self.func_name,
            args: self.args,
            status: self.status.parse::<TaskStatus>()?,
            run_at: self.run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
