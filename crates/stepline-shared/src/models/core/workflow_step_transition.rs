//! Append-only workflow step transition history.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowStepTransition {
    pub workflow_step_transition_uuid: Uuid,
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub sort_key: i32,
    pub most_recent: bool,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWorkflowStepTransition {
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<Value>,
}

impl WorkflowStepTransition {
    pub async fn most_recent<'e, E>(
        executor: E,
        workflow_step_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.workflow_step_transitions \
             WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(executor)
        .await
    }

    /// Append a transition inside an open transaction.
    pub async fn append(
        conn: &mut PgConnection,
        new: NewWorkflowStepTransition,
    ) -> Result<Self, sqlx::Error> {
        let next_sort_key: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_key), 0) + 1 \
             FROM stepline.workflow_step_transitions WHERE workflow_step_uuid = $1",
        )
        .bind(new.workflow_step_uuid)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE stepline.workflow_step_transitions \
             SET most_recent = FALSE \
             WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(new.workflow_step_uuid)
        .execute(&mut *conn)
        .await?;

        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.workflow_step_transitions \
             (workflow_step_transition_uuid, workflow_step_uuid, to_state, from_state, \
              sort_key, most_recent, metadata) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.workflow_step_uuid)
        .bind(&new.to_state)
        .bind(&new.from_state)
        .bind(next_sort_key)
        .bind(&new.metadata)
        .fetch_one(&mut *conn)
        .await
    }

    /// Append a transition in its own transaction.
    pub async fn create(
        pool: &PgPool,
        new: NewWorkflowStepTransition,
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let row = Self::append(&mut tx, new).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Full history, oldest first.
    pub async fn history(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.workflow_step_transitions \
             WHERE workflow_step_uuid = $1 ORDER BY sort_key",
        )
        .bind(workflow_step_uuid)
        .fetch_all(pool)
        .await
    }
}
