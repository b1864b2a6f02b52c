//! Per-step readiness record.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::state_machine::states::StepState;

/// One row of `stepline.get_step_readiness`: whether a step may run right
/// now and, when it may not, why.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StepReadiness {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step: String,
    pub current_state: String,
    pub attempts: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub total_parents: i32,
    pub unsatisfied_parents: i32,
    pub dependencies_satisfied: bool,
    pub retry_eligible: bool,
    pub ready_for_execution: bool,
    /// `no_retries_needed | retry_eligible | in_backoff | max_retries_reached`
    pub retry_status: String,
    /// `no_dependencies | all_satisfied | waiting_on_<n>`
    pub dependency_status: String,
    /// `None` when ready; otherwise `invalid_state |
    /// dependencies_not_satisfied | retry_not_eligible | unknown`.
    pub blocking_reason: Option<String>,
    /// Seconds until `next_retry_at`, when one is set in the future.
    pub time_until_ready: Option<f64>,
    pub next_retry_at: Option<NaiveDateTime>,
}

impl StepReadiness {
    /// The step's state as a typed value. Readiness rows always carry a
    /// label from the closed set.
    pub fn state(&self) -> StepState {
        self.current_state.parse().unwrap_or(StepState::Pending)
    }

    /// Errored with retries remaining, whether or not the backoff window
    /// has elapsed.
    pub fn has_remaining_retries(&self) -> bool {
        self.state() == StepState::Error
            && self.retryable
            && self.attempts < self.retry_limit
    }

    /// Errored with no path forward short of manual resolution.
    pub fn permanently_blocked(&self) -> bool {
        self.state() == StepState::Error
            && (!self.retryable || self.attempts >= self.retry_limit)
    }
}
