//! Task state machine.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::errors::TransitionError;
use crate::models::core::task::Task;
use crate::models::core::task_transition::{NewTaskTransition, TaskTransition};
use crate::state_machine::events::task_event_name;
use crate::state_machine::states::TaskState;
use crate::system_context::SystemContext;

/// Guarded, transactional transitions for one task.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    task: Task,
    context: Arc<SystemContext>,
}

impl TaskStateMachine {
    pub fn new(task: Task, context: Arc<SystemContext>) -> Self {
        Self { task, context }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// Current state from the `most_recent` transition; `None` before the
    /// initial transition (which reads as pending everywhere else).
    pub async fn current_state(&self) -> Result<Option<TaskState>, TransitionError> {
        let row =
            TaskTransition::most_recent(self.context.database_pool(), self.task.task_uuid).await?;
        row.map(|t| parse_state(&t.to_state)).transpose()
    }

    /// Record the initial `(nil) -> pending` transition.
    pub async fn initialize(&mut self) -> Result<TaskState, TransitionError> {
        self.transition_to(TaskState::Pending, None).await
    }

    /// Run one guarded transition. The transition row, `most_recent` flip,
    /// and derived-column update commit atomically.
    pub async fn transition_to(
        &mut self,
        target: TaskState,
        metadata: Option<Value>,
    ) -> Result<TaskState, TransitionError> {
        let task_uuid = self.task.task_uuid;
        let mut tx = self.context.database_pool().begin().await?;

        let stored = TaskTransition::most_recent(&mut *tx, task_uuid)
            .await?
            .map(|t| parse_state(&t.to_state))
            .transpose()?;

        // A task with no transition history reads as pending; the only legal
        // first transition is the explicit initialize into pending.
        let effective = stored.unwrap_or(TaskState::Pending);
        let allowed = match (stored, target) {
            (None, TaskState::Pending) => true,
            _ => TaskState::transition_allowed(effective, target),
        };
        if !allowed {
            return Err(TransitionError::NotAllowed {
                entity: "task",
                from: stored.map(|s| s.to_string()),
                to: target.to_string(),
            });
        }

        if let (TaskState::InProgress, TaskState::Complete) = (effective, target) {
            let unfinished: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM stepline.workflow_steps \
                 WHERE task_uuid = $1 AND status IN ('pending', 'in_progress', 'error')",
            )
            .bind(task_uuid)
            .fetch_one(&mut *tx)
            .await?;
            if unfinished > 0 {
                return Err(TransitionError::GuardFailed {
                    entity: "task",
                    from: stored.map(|s| s.to_string()),
                    to: target.to_string(),
                    reason: format!("{unfinished} steps are not in a terminal state"),
                });
            }
        }

        self.context
            .event_publisher()
            .publish_before_transition(
                "task",
                task_uuid,
                stored.map(|s| s.to_string()),
                target.to_string(),
                &self.task.correlation_id,
            )
            .await;

        TaskTransition::append(
            &mut tx,
            NewTaskTransition {
                task_uuid,
                to_state: target.to_string(),
                from_state: stored.map(|s| s.to_string()),
                metadata: metadata.clone(),
            },
        )
        .await?;

        let complete = matches!(target, TaskState::Complete | TaskState::ResolvedManually);
        sqlx::query(
            "UPDATE stepline.tasks \
             SET status = $2, complete = $3, updated_at = (NOW() AT TIME ZONE 'utc') \
             WHERE task_uuid = $1",
        )
        .bind(task_uuid)
        .bind(target.as_str())
        .bind(complete)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.task.status = target.as_str().to_string();
        self.task.complete = complete;

        // An uninitialized task reads as pending for event naming too; only
        // the explicit initialize transition reports a nil origin.
        let event_from = match (stored, target) {
            (None, TaskState::Pending) => None,
            _ => Some(effective),
        };
        let event = task_event_name(event_from, target);
        debug!(
            correlation_id = %self.task.correlation_id,
            task_uuid = %task_uuid,
            from = ?stored.map(|s| s.as_str()),
            to = %target,
            event = event,
            "Task transition committed"
        );
        self.context
            .event_publisher()
            .publish_task_transition(event, &self.task, metadata)
            .await;

        Ok(target)
    }
}

fn parse_state(label: &str) -> Result<TaskState, TransitionError> {
    label
        .parse()
        .map_err(|_| TransitionError::CorruptState(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::factory;

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn initialize_then_start(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = factory::create_task_bare(&pool).await?;
        let mut machine = TaskStateMachine::new(task.clone(), context);

        assert_eq!(machine.current_state().await?, None);
        assert_eq!(machine.initialize().await?, TaskState::Pending);
        assert_eq!(machine.current_state().await?, Some(TaskState::Pending));

        let state = machine.transition_to(TaskState::InProgress, None).await?;
        assert_eq!(state, TaskState::InProgress);
        assert_eq!(machine.task().status, "in_progress");

        let history = TaskTransition::history(&pool, task.task_uuid).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, "pending");
        assert_eq!(history[1].to_state, "in_progress");
        assert!(history[1].most_recent);
        assert!(!history[0].most_recent);
        assert!(history[0].sort_key < history[1].sort_key);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn completion_guard_rejects_unfinished_steps(
        pool: sqlx::PgPool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let (task, _steps) = factory::create_linear_task(&pool, 2).await?;
        let mut machine = TaskStateMachine::new(task, context);

        machine.initialize().await?;
        machine.transition_to(TaskState::InProgress, None).await?;

        let err = machine
            .transition_to(TaskState::Complete, None)
            .await
            .expect_err("steps are still pending");
        assert!(matches!(err, TransitionError::GuardFailed { .. }));
        assert!(err.is_expected());
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn illegal_pairs_are_rejected_without_writing(
        pool: sqlx::PgPool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = factory::create_task_bare(&pool).await?;
        let mut machine = TaskStateMachine::new(task.clone(), context);
        machine.initialize().await?;

        let err = machine
            .transition_to(TaskState::Complete, None)
            .await
            .expect_err("pending -> complete is not in the table");
        assert!(matches!(err, TransitionError::NotAllowed { .. }));

        let history = TaskTransition::history(&pool, task.task_uuid).await?;
        assert_eq!(history.len(), 1, "rejected transition must not append");
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn error_to_pending_supports_the_retry_loop(
        pool: sqlx::PgPool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = factory::create_task_bare(&pool).await?;
        let mut machine = TaskStateMachine::new(task, context);

        machine.initialize().await?;
        machine.transition_to(TaskState::InProgress, None).await?;
        machine.transition_to(TaskState::Error, None).await?;
        let state = machine.transition_to(TaskState::Pending, None).await?;
        assert_eq!(state, TaskState::Pending);
        Ok(())
    }
}
