//! Step state machine.
//!
//! Besides plain transitions, the step machine owns the outcome operations:
//! claiming a step for execution, recording success, and recording failure.
//! Each runs as a single transaction so the transition row, the `most_recent`
//! flip, and the step-row mutation (attempts, results, retry bookkeeping)
//! commit or roll back together.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgConnection;
use tracing::debug;

use crate::errors::TransitionError;
use crate::models::core::workflow_step::WorkflowStep;
use crate::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};
use crate::state_machine::events::step_event_name;
use crate::state_machine::states::StepState;
use crate::system_context::SystemContext;

/// Error details persisted into `results.error` on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepErrorRecord {
    pub message: String,
    pub error_class: Option<String>,
    pub backtrace: Option<String>,
    pub retryable: bool,
}

/// Step-row mutation applied inside the transition's transaction.
#[derive(Debug)]
enum RowUpdate<'a> {
    /// Plain status update.
    StatusOnly,
    /// Mark the step claimed by a worker.
    Claim,
    /// Successful outcome: results, processed bookkeeping, attempt count.
    Complete { results: Option<&'a Value> },
    /// Failed outcome: error record, attempt count, retry bookkeeping.
    Fail {
        error: &'a StepErrorRecord,
        next_retry_at: Option<NaiveDateTime>,
    },
}

/// Guarded, transactional transitions for one workflow step.
#[derive(Debug, Clone)]
pub struct StepStateMachine {
    step: WorkflowStep,
    context: Arc<SystemContext>,
    correlation_id: String,
}

impl StepStateMachine {
    pub fn new(step: WorkflowStep, context: Arc<SystemContext>) -> Self {
        Self {
            step,
            context,
            correlation_id: String::new(),
        }
    }

    /// Attach the coordinator's correlation id for logs and events.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn step(&self) -> &WorkflowStep {
        &self.step
    }

    pub fn into_step(self) -> WorkflowStep {
        self.step
    }

    pub async fn current_state(&self) -> Result<Option<StepState>, TransitionError> {
        let row = WorkflowStepTransition::most_recent(
            self.context.database_pool(),
            self.step.workflow_step_uuid,
        )
        .await?;
        row.map(|t| parse_state(&t.to_state)).transpose()
    }

    /// Record the initial `(nil) -> pending` transition.
    pub async fn initialize(&mut self) -> Result<StepState, TransitionError> {
        self.apply(StepState::Pending, None, RowUpdate::StatusOnly)
            .await
    }

    /// Claim the step and move it to in_progress. An errored step with
    /// retries remaining passes through pending first (`retry_requested`),
    /// so history reads error -> pending -> in_progress.
    pub async fn start(&mut self) -> Result<StepState, TransitionError> {
        if self.current_state().await?.unwrap_or(StepState::Pending) == StepState::Error {
            self.apply(StepState::Pending, None, RowUpdate::StatusOnly)
                .await?;
        }
        self.apply(StepState::InProgress, None, RowUpdate::Claim)
            .await
    }

    /// Record a successful handler outcome.
    pub async fn complete_with_results(
        &mut self,
        results: Option<Value>,
    ) -> Result<StepState, TransitionError> {
        self.apply(
            StepState::Complete,
            None,
            RowUpdate::Complete {
                results: results.as_ref(),
            },
        )
        .await
    }

    /// Record a failed handler outcome. A permanent failure clears the
    /// retryable flag; a retryable one carries its `next_retry_at`.
    pub async fn fail_with_error(
        &mut self,
        error: &StepErrorRecord,
        next_retry_at: Option<NaiveDateTime>,
    ) -> Result<StepState, TransitionError> {
        self.apply(
            StepState::Error,
            Some(serde_json::json!({ "error": error.message })),
            RowUpdate::Fail {
                error,
                next_retry_at,
            },
        )
        .await
    }

    /// Operator action: mark an errored step as manually resolved.
    pub async fn resolve_manually(
        &mut self,
        metadata: Option<Value>,
    ) -> Result<StepState, TransitionError> {
        self.apply(StepState::ResolvedManually, metadata, RowUpdate::StatusOnly)
            .await
    }

    pub async fn cancel(&mut self, metadata: Option<Value>) -> Result<StepState, TransitionError> {
        self.apply(StepState::Cancelled, metadata, RowUpdate::StatusOnly)
            .await
    }

    async fn apply(
        &mut self,
        target: StepState,
        metadata: Option<Value>,
        update: RowUpdate<'_>,
    ) -> Result<StepState, TransitionError> {
        let step_uuid = self.step.workflow_step_uuid;
        let mut tx = self.context.database_pool().begin().await?;

        let stored = WorkflowStepTransition::most_recent(&mut *tx, step_uuid)
            .await?
            .map(|t| parse_state(&t.to_state))
            .transpose()?;

        let effective = stored.unwrap_or(StepState::Pending);
        let allowed = match (stored, target) {
            (None, StepState::Pending) => true,
            _ => StepState::transition_allowed(effective, target),
        };
        if !allowed {
            return Err(TransitionError::NotAllowed {
                entity: "step",
                from: stored.map(|s| s.to_string()),
                to: target.to_string(),
            });
        }

        // Dependency gate: in_progress requires every parent in a
        // terminal-success state (or bypassed by the task).
        if target == StepState::InProgress {
            let unsatisfied = Self::unsatisfied_parents(&mut tx, step_uuid).await?;
            if unsatisfied > 0 {
                return Err(TransitionError::GuardFailed {
                    entity: "step",
                    from: stored.map(|s| s.to_string()),
                    to: target.to_string(),
                    reason: format!("{unsatisfied} parent steps are not terminal-success"),
                });
            }
        }

        self.context
            .event_publisher()
            .publish_before_transition(
                "step",
                step_uuid,
                stored.map(|s| s.to_string()),
                target.to_string(),
                &self.correlation_id,
            )
            .await;

        WorkflowStepTransition::append(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: target.to_string(),
                from_state: stored.map(|s| s.to_string()),
                metadata: metadata.clone(),
            },
        )
        .await?;

        self.apply_row_update(&mut tx, target, &update).await?;
        tx.commit().await?;

        // Refresh the in-memory copy from the committed row.
        if let Some(step) =
            WorkflowStep::find_by_id(self.context.database_pool(), step_uuid).await?
        {
            self.step = step;
        }

        let event_from = match (stored, target) {
            (None, StepState::Pending) => None,
            _ => Some(effective),
        };
        let event = step_event_name(event_from, target);
        debug!(
            correlation_id = %self.correlation_id,
            workflow_step_uuid = %step_uuid,
            named_step = %self.step.named_step,
            from = ?stored.map(|s| s.as_str()),
            to = %target,
            event = event,
            "Step transition committed"
        );
        self.context
            .event_publisher()
            .publish_step_transition(event, &self.step, &self.correlation_id, metadata)
            .await;

        Ok(target)
    }

    async fn apply_row_update(
        &self,
        tx: &mut PgConnection,
        target: StepState,
        update: &RowUpdate<'_>,
    ) -> Result<(), sqlx::Error> {
        let step_uuid = self.step.workflow_step_uuid;
        match update {
            RowUpdate::StatusOnly => {
                sqlx::query(
                    "UPDATE stepline.workflow_steps \
                     SET status = $2, updated_at = (NOW() AT TIME ZONE 'utc') \
                     WHERE workflow_step_uuid = $1",
                )
                .bind(step_uuid)
                .bind(target.as_str())
                .execute(tx)
                .await?;
            }
            RowUpdate::Claim => {
                sqlx::query(
                    "UPDATE stepline.workflow_steps \
                     SET status = $2, in_process = TRUE, \
                         updated_at = (NOW() AT TIME ZONE 'utc') \
                     WHERE workflow_step_uuid = $1",
                )
                .bind(step_uuid)
                .bind(target.as_str())
                .execute(tx)
                .await?;
            }
            RowUpdate::Complete { results } => {
                sqlx::query(
                    "UPDATE stepline.workflow_steps \
                     SET status = $2, results = COALESCE($3, results), \
                         processed = TRUE, processed_at = (NOW() AT TIME ZONE 'utc'), \
                         in_process = FALSE, attempts = attempts + 1, \
                         last_attempted_at = (NOW() AT TIME ZONE 'utc'), \
                         next_retry_at = NULL, \
                         updated_at = (NOW() AT TIME ZONE 'utc') \
                     WHERE workflow_step_uuid = $1",
                )
                .bind(step_uuid)
                .bind(target.as_str())
                .bind(*results)
                .execute(tx)
                .await?;
            }
            RowUpdate::Fail {
                error,
                next_retry_at,
            } => {
                let error_json =
                    serde_json::to_value(error).unwrap_or_else(|_| Value::Null);
                sqlx::query(
                    "UPDATE stepline.workflow_steps \
                     SET status = $2, \
                         results = COALESCE(results, '{}'::jsonb) || jsonb_build_object('error', $3::jsonb), \
                         attempts = attempts + 1, \
                         last_attempted_at = (NOW() AT TIME ZONE 'utc'), \
                         in_process = FALSE, \
                         retryable = retryable AND $4, \
                         next_retry_at = $5, \
                         updated_at = (NOW() AT TIME ZONE 'utc') \
                     WHERE workflow_step_uuid = $1",
                )
                .bind(step_uuid)
                .bind(target.as_str())
                .bind(error_json)
                .bind(error.retryable)
                .bind(*next_retry_at)
                .execute(tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn unsatisfied_parents(
        tx: &mut PgConnection,
        step_uuid: uuid::Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM stepline.workflow_step_edges e \
             JOIN stepline.workflow_steps parent ON parent.workflow_step_uuid = e.from_step_uuid \
             JOIN stepline.tasks t ON t.task_uuid = parent.task_uuid \
             WHERE e.to_step_uuid = $1 \
               AND parent.status NOT IN ('complete', 'resolved_manually') \
               AND NOT COALESCE(t.bypass_steps ? parent.named_step::text, FALSE)",
        )
        .bind(step_uuid)
        .fetch_one(tx)
        .await
    }
}

fn parse_state(label: &str) -> Result<StepState, TransitionError> {
    label
        .parse()
        .map_err(|_| TransitionError::CorruptState(label.to_string()))
}
