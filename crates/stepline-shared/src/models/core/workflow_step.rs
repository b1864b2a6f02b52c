//! Runtime workflow steps.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::state_machine::states::StepState;

pub const DEFAULT_RETRY_LIMIT: i32 = 3;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step: String,
    pub status: String,
    pub attempts: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub in_process: bool,
    pub processed: bool,
    pub processed_at: Option<NaiveDateTime>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub next_retry_at: Option<NaiveDateTime>,
    pub inputs: Option<Value>,
    pub results: Option<Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWorkflowStep {
    pub task_uuid: Uuid,
    pub named_step: String,
    pub inputs: Option<Value>,
    pub retry_limit: Option<i32>,
    pub retryable: bool,
}

impl NewWorkflowStep {
    pub fn named(task_uuid: Uuid, named_step: impl Into<String>) -> Self {
        Self {
            task_uuid,
            named_step: named_step.into(),
            inputs: None,
            retry_limit: None,
            retryable: true,
        }
    }
}

impl WorkflowStep {
    pub async fn create(pool: &PgPool, new: NewWorkflowStep) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.workflow_steps \
             (workflow_step_uuid, task_uuid, named_step, inputs, retry_limit, retryable) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.task_uuid)
        .bind(&new.named_step)
        .bind(&new.inputs)
        .bind(new.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT))
        .bind(new.retryable)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.workflow_steps WHERE workflow_step_uuid = $1",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(pool)
        .await
    }

    pub async fn for_task(pool: &PgPool, task_uuid: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.workflow_steps WHERE task_uuid = $1 ORDER BY named_step",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
    }

    /// Derived status as a typed state.
    pub fn state(&self) -> StepState {
        self.status.parse().unwrap_or(StepState::Pending)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= self.retry_limit
    }
}
