//! Invocation persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Invocation, InvocationId, TaskId};
use crate::store::InvocationStore;

#[async_trait]
impl InvocationStore for super::Db {
    async fn all_by_task(&self, task_id: TaskId) -> Result<Vec<Invocation>> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM tasks WHERE id = $1)")
            .bind(task_id.0)
            .fetch_one(self.pool())
            .await?;
        if !exists {
            return Err(Error::NotFound(format!("task {task_id}")));
        }

        let rows: Vec<InvocationRow> = sqlx::query_as(
            "SELECT id, task_id, result, error, created_at, updated_at
             FROM invocations WHERE task_id = $1
             ORDER BY created_at",
        )
        .bind(task_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(InvocationRow::into_invocation).collect())
    }

    async fn save(&self, invocation: &Invocation) -> Result<Invocation> {
        let id = if invocation.id.is_nil() {
            InvocationId::new()
        } else {
            invocation.id
        };

        // created_at is only written on insert.
        let row: InvocationRow = sqlx::query_as(
            "INSERT INTO invocations (id, task_id, result, error, created_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             ON CONFLICT (id) DO UPDATE SET
                 result = EXCLUDED.result,
                 error = EXCLUDED.error,
                 updated_at = EXCLUDED.updated_at
             RETURNING id, task_id, result, error, created_at, updated_at",
        )
        .bind(id.0)
        .bind(invocation.task_id.0)
        .bind(invocation.result)
        .bind(&invocation.error)
        .fetch_one(self.pool())
        .await?;

        Ok(row.into_invocation())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: Uuid,
    task_id: Uuid,
    result: bool,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvocationRow {
    fn into_invocation(self) -> Invocation {
        Invocation {
            id: InvocationId(self.id),
            task_id: TaskId(self.task_id),
            result: self.result,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
