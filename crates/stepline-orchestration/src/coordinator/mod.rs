//! # Workflow Coordinator
//!
//! The outer retry/finalize loop. One invocation of [`WorkflowCoordinator::handle`]
//! drives a task as far as it can go right now: discover viable steps, run
//! them through the executor, repeat until nothing is viable, then decide
//! whether the task completes, fails, or goes back to the queue.
//!
//! One coordinator per task at a time is assumed (enforced by the outer
//! driver); multi-node deployments must add leased ownership keyed on the
//! task before relaxing that.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stepline_shared::errors::{EngineError, EngineResult};
use stepline_shared::models::{Task, WorkflowStep};
use stepline_shared::state_machine::{TaskState, TaskStateMachine};
use stepline_shared::SystemContext;

use crate::executor::StepExecutor;
use crate::handler::HandlerRegistry;
use crate::reenqueuer::TaskReenqueuer;

pub mod sequence;
pub mod step_group;

pub use sequence::StepSequence;
pub use step_group::StepGroup;

/// How a `handle` invocation left the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationAction {
    Completed,
    Failed,
    Reenqueued { delay_seconds: Option<u64> },
}

#[derive(Debug, Clone)]
pub struct CoordinationOutcome {
    pub task_uuid: Uuid,
    pub action: CoordinationAction,
    /// Loop passes that executed at least one batch.
    pub passes: u32,
    pub batches_executed: u32,
    /// Step attempts across all passes (a retried step counts each time).
    pub steps_processed: usize,
}

#[derive(Debug, Clone)]
pub struct WorkflowCoordinator {
    context: Arc<SystemContext>,
    executor: StepExecutor,
    registry: Arc<HandlerRegistry>,
    reenqueuer: TaskReenqueuer,
}

impl WorkflowCoordinator {
    pub fn new(
        context: Arc<SystemContext>,
        registry: Arc<HandlerRegistry>,
        reenqueuer: TaskReenqueuer,
    ) -> Self {
        let executor = StepExecutor::new(context.clone());
        Self {
            context,
            executor,
            registry,
            reenqueuer,
        }
    }

    /// Drive one task as far as the current snapshot allows, then finalize.
    pub async fn handle(&self, task_uuid: Uuid) -> EngineResult<CoordinationOutcome> {
        let pool = self.context.database_pool();
        let task = Task::find_by_id(pool, task_uuid)
            .await?
            .ok_or(EngineError::TaskNotFound(task_uuid))?;
        let correlation_id = task.correlation_id.clone();
        let task_name: Arc<str> = Arc::from(task.full_name(pool).await?.as_str());

        info!(
            correlation_id = %correlation_id,
            task_uuid = %task_uuid,
            task_name = %task_name,
            status = %task.status,
            "Coordinator picked up task"
        );

        let mut machine = TaskStateMachine::new(task, self.context.clone());

        // Idempotent start: a task already in progress is left alone.
        if machine.task().state() != TaskState::InProgress {
            match machine.transition_to(TaskState::InProgress, None).await {
                Ok(_) => {}
                Err(e) if e.is_expected() => {
                    debug!(
                        correlation_id = %correlation_id,
                        task_uuid = %task_uuid,
                        reason = %e,
                        "Start transition rejected; continuing with current state"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.context
            .event_publisher()
            .publish_task_started(machine.task())
            .await;

        let mut sequence = Arc::new(StepSequence::load(&self.context, task_uuid).await?);
        let prior_incomplete = sequence.incomplete_steps();

        let task_snapshot = Arc::new(machine.task().clone());
        let mut all_processed: Vec<WorkflowStep> = Vec::new();
        let mut passes = 0u32;
        let mut batches_executed = 0u32;

        loop {
            let viable: Vec<Uuid> = sequence
                .viable_steps()
                .iter()
                .map(|r| r.workflow_step_uuid)
                .collect();
            if viable.is_empty() {
                break;
            }
            passes += 1;

            let report = self
                .executor
                .execute(
                    task_snapshot.clone(),
                    task_name.clone(),
                    sequence.clone(),
                    viable,
                    self.registry.clone(),
                    &correlation_id,
                )
                .await;
            batches_executed += report.batches;
            let processed_this_pass = report.processed.len();
            all_processed.extend(report.processed);

            if processed_this_pass == 0 {
                // Nothing moved (timeout or lost claims); let finalization
                // route the task instead of spinning.
                break;
            }
            if self.blocked_by_errors(task_uuid).await? {
                break;
            }
            sequence = Arc::new(StepSequence::load(&self.context, task_uuid).await?);
        }

        self.finalize(
            machine,
            &correlation_id,
            prior_incomplete,
            all_processed,
            passes,
            batches_executed,
        )
        .await
    }

    /// A permanently blocked step anywhere in the task ends the loop.
    async fn blocked_by_errors(&self, task_uuid: Uuid) -> EngineResult<bool> {
        let context = self
            .context
            .sql_functions()
            .get_task_execution_context(task_uuid)
            .await?;
        Ok(context
            .map(|c| c.permanently_blocked_steps > 0)
            .unwrap_or(false))
    }

    async fn finalize(
        &self,
        mut machine: TaskStateMachine,
        correlation_id: &str,
        prior_incomplete: HashSet<Uuid>,
        processed: Vec<WorkflowStep>,
        passes: u32,
        batches_executed: u32,
    ) -> EngineResult<CoordinationOutcome> {
        let task_uuid = machine.task().task_uuid;
        let sequence = StepSequence::load(&self.context, task_uuid).await?;
        let group = StepGroup::build(&sequence, &prior_incomplete, &processed);
        let permanently_blocked = sequence
            .readiness()
            .iter()
            .any(|r| r.permanently_blocked());

        let action = if group.is_complete() {
            Self::transition_tolerant(&mut machine, TaskState::Complete, None, correlation_id)
                .await?;
            info!(
                correlation_id = %correlation_id,
                task_uuid = %task_uuid,
                steps_processed = processed.len(),
                "Task completed"
            );
            CoordinationAction::Completed
        } else if permanently_blocked {
            let summary = Self::error_step_summary(&sequence);
            Self::transition_tolerant(
                &mut machine,
                TaskState::Error,
                Some(json!({ "error_steps": summary })),
                correlation_id,
            )
            .await?;
            warn!(
                correlation_id = %correlation_id,
                task_uuid = %task_uuid,
                "Task failed with permanently blocked steps"
            );
            CoordinationAction::Failed
        } else if group.is_pending() {
            // Back to pending so the queue can pick it up again.
            Self::transition_tolerant(&mut machine, TaskState::Pending, None, correlation_id)
                .await?;

            let delay = Self::retry_delay(&sequence);
            match delay {
                Some(delay) if !delay.is_zero() => {
                    self.reenqueuer
                        .reenqueue_delayed(machine.task(), delay, "steps awaiting retry backoff")
                        .await?;
                    CoordinationAction::Reenqueued {
                        delay_seconds: Some(delay.as_secs()),
                    }
                }
                _ => {
                    self.reenqueuer
                        .reenqueue(machine.task(), "steps still working")
                        .await?;
                    CoordinationAction::Reenqueued {
                        delay_seconds: None,
                    }
                }
            }
        } else {
            Self::transition_tolerant(&mut machine, TaskState::Complete, None, correlation_id)
                .await?;
            CoordinationAction::Completed
        };

        Ok(CoordinationOutcome {
            task_uuid,
            action,
            passes,
            batches_executed,
            steps_processed: processed.len(),
        })
    }

    /// Guard and legality rejections here mean the task is already where
    /// finalization wants it (repeat invocation, concurrent operator
    /// action); they are logged and absorbed.
    async fn transition_tolerant(
        machine: &mut TaskStateMachine,
        target: TaskState,
        metadata: Option<Value>,
        correlation_id: &str,
    ) -> EngineResult<()> {
        match machine.transition_to(target, metadata).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_expected() => {
                debug!(
                    correlation_id = %correlation_id,
                    task_uuid = %machine.task().task_uuid,
                    target = %target,
                    reason = %e,
                    "Finalization transition rejected; task already settled"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `max(0, earliest next_retry_at - now)` across retry-eligible errored
    /// steps; `None` when nothing carries a backoff (immediate reenqueue).
    fn retry_delay(sequence: &StepSequence) -> Option<Duration> {
        let now = chrono::Utc::now().naive_utc();
        sequence
            .readiness()
            .iter()
            .filter(|r| r.has_remaining_retries())
            .filter_map(|r| r.next_retry_at)
            .min()
            .map(|at| {
                if at > now {
                    (at - now).to_std().unwrap_or(Duration::ZERO)
                } else {
                    Duration::ZERO
                }
            })
    }

    fn error_step_summary(sequence: &StepSequence) -> Value {
        let summary: Vec<Value> = sequence
            .readiness()
            .iter()
            .filter(|r| r.permanently_blocked())
            .map(|r| {
                json!({
                    "workflow_step_uuid": r.workflow_step_uuid,
                    "named_step": r.named_step,
                    "attempts": r.attempts,
                    "retry_limit": r.retry_limit,
                    "retryable": r.retryable,
                    "results": sequence
                        .step(r.workflow_step_uuid)
                        .and_then(|s| s.results.clone()),
                })
            })
            .collect();
        Value::Array(summary)
    }
}
