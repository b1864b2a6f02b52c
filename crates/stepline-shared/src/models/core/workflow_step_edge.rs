//! DAG edges between steps of one task.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize)]
pub struct WorkflowStepEdge {
    pub from_step_uuid: Uuid,
    pub to_step_uuid: Uuid,
    pub created_at: NaiveDateTime,
}

impl WorkflowStepEdge {
    pub async fn create(
        pool: &PgPool,
        from_step_uuid: Uuid,
        to_step_uuid: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.workflow_step_edges (from_step_uuid, to_step_uuid) \
             VALUES ($1, $2) \
             RETURNING *",
        )
        .bind(from_step_uuid)
        .bind(to_step_uuid)
        .fetch_one(pool)
        .await
    }

    /// All edges of a task, joined through the source step.
    pub async fn for_task(pool: &PgPool, task_uuid: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT e.* FROM stepline.workflow_step_edges e \
             JOIN stepline.workflow_steps ws ON ws.workflow_step_uuid = e.from_step_uuid \
             WHERE ws.task_uuid = $1",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
    }
}
