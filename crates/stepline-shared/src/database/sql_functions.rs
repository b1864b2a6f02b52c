//! Typed wrappers for the SQL readiness functions.
//!
//! The functions themselves are installed by migration and evaluated
//! entirely in the database so they stay deterministic for a given
//! snapshot. Rust only shapes the rows.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::orchestration::{
    DependencyLevel, StepReadiness, SystemHealth, TaskExecutionContext,
};

/// Typed access to the readiness functions installed by the
/// `readiness_functions` migration.
#[derive(Debug, Clone)]
pub struct SqlFunctionExecutor {
    pool: PgPool,
}

impl SqlFunctionExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Per-step readiness records for a task.
    pub async fn get_step_readiness(&self, task_uuid: Uuid) -> EngineResult<Vec<StepReadiness>> {
        sqlx::query_as::<_, StepReadiness>(
            "SELECT * FROM stepline.get_step_readiness($1)",
        )
        .bind(task_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::database("get_step_readiness", e))
    }

    /// Fresh readiness for a single step, straight from the current snapshot.
    /// Used to re-verify a step just before handing it to a worker.
    pub async fn get_step_readiness_for(
        &self,
        task_uuid: Uuid,
        workflow_step_uuid: Uuid,
    ) -> EngineResult<Option<StepReadiness>> {
        sqlx::query_as::<_, StepReadiness>(
            "SELECT * FROM stepline.get_step_readiness($1) WHERE workflow_step_uuid = $2",
        )
        .bind(task_uuid)
        .bind(workflow_step_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::database("get_step_readiness_for", e))
    }

    /// Aggregate execution context for a task; `None` when the task does not
    /// exist.
    pub async fn get_task_execution_context(
        &self,
        task_uuid: Uuid,
    ) -> EngineResult<Option<TaskExecutionContext>> {
        sqlx::query_as::<_, TaskExecutionContext>(
            "SELECT * FROM stepline.get_task_execution_context($1)",
        )
        .bind(task_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::database("get_task_execution_context", e))
    }

    /// Process-wide counters that drive dynamic concurrency.
    pub async fn get_system_health(&self) -> EngineResult<SystemHealth> {
        sqlx::query_as::<_, SystemHealth>("SELECT * FROM stepline.get_system_health()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::database("get_system_health", e))
    }

    /// Topological depth per step, roots at level 0.
    pub async fn get_dependency_levels(
        &self,
        task_uuid: Uuid,
    ) -> EngineResult<HashMap<Uuid, i32>> {
        let rows = sqlx::query_as::<_, DependencyLevel>(
            "SELECT * FROM stepline.get_dependency_levels($1)",
        )
        .bind(task_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::database("get_dependency_levels", e))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.workflow_step_uuid, row.dependency_level))
            .collect())
    }
}
