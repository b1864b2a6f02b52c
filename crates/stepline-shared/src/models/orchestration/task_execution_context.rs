//! Aggregate execution context for a task.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ParseStateError;

/// One row of `stepline.get_task_execution_context`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskExecutionContext {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub status: String,
    pub total_steps: i64,
    pub pending_steps: i64,
    pub in_progress_steps: i64,
    pub complete_steps: i64,
    pub failed_steps: i64,
    pub ready_steps: i64,
    pub permanently_blocked_steps: i64,
    pub retry_eligible_failed_steps: i64,
    #[sqlx(try_from = "String")]
    pub execution_status: ExecutionStatus,
    #[sqlx(try_from = "String")]
    pub health_status: HealthStatus,
    pub completion_percentage: f64,
}

impl TaskExecutionContext {
    pub fn is_blocked(&self) -> bool {
        self.execution_status == ExecutionStatus::BlockedByFailures
    }

    pub fn is_complete(&self) -> bool {
        self.execution_status == ExecutionStatus::AllComplete
    }
}

/// What the coordinator should do with the task right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    HasReadySteps,
    Processing,
    WaitingForDependencies,
    BlockedByFailures,
    AllComplete,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasReadySteps => "has_ready_steps",
            Self::Processing => "processing",
            Self::WaitingForDependencies => "waiting_for_dependencies",
            Self::BlockedByFailures => "blocked_by_failures",
            Self::AllComplete => "all_complete",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "has_ready_steps" => Ok(Self::HasReadySteps),
            "processing" => Ok(Self::Processing),
            "waiting_for_dependencies" => Ok(Self::WaitingForDependencies),
            "blocked_by_failures" => Ok(Self::BlockedByFailures),
            "all_complete" => Ok(Self::AllComplete),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = ParseStateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Coarse health classification of a task's step set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

impl TryFrom<String> for HealthStatus {
    type Error = ParseStateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_round_trips() {
        for status in [
            ExecutionStatus::HasReadySteps,
            ExecutionStatus::Processing,
            ExecutionStatus::WaitingForDependencies,
            ExecutionStatus::BlockedByFailures,
            ExecutionStatus::AllComplete,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert!("definitely_not_a_status".parse::<ExecutionStatus>().is_err());
        assert!("degraded".parse::<HealthStatus>().is_err());
    }
}
