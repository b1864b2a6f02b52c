//! Derived rows produced by the readiness SQL functions.

pub mod step_readiness;
pub mod system_health;
pub mod task_execution_context;

pub use step_readiness::StepReadiness;
pub use system_health::SystemHealth;
pub use task_execution_context::{ExecutionStatus, HealthStatus, TaskExecutionContext};

use sqlx::FromRow;
use uuid::Uuid;

/// One row of `stepline.get_dependency_levels`.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct DependencyLevel {
    pub workflow_step_uuid: Uuid,
    pub dependency_level: i32,
}
