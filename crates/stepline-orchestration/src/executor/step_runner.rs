//! Single-step execution.
//!
//! Re-verifies readiness from the current snapshot, claims the step,
//! invokes the handler, and records the outcome through the step state
//! machine. Everything a worker does funnels through here.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use stepline_shared::errors::{EngineError, TransitionError};
use stepline_shared::models::{Task, WorkflowStep};
use stepline_shared::state_machine::{StepErrorRecord, StepStateMachine};
use stepline_shared::SystemContext;

use crate::backoff::BackoffPolicy;
use crate::coordinator::sequence::StepSequence;
use crate::handler::HandlerRegistry;

/// Worker-level result for one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step was attempted; its row reflects success or failure.
    Processed(WorkflowStep),
    /// The step was not attempted (raced away, no longer ready). Expected
    /// flow, not an error.
    Skipped { step_uuid: Uuid, reason: String },
}

#[derive(Debug, Error)]
pub enum StepExecutionError {
    #[error("no handler registered for {task_name}/{named_step}")]
    HandlerMissing {
        task_name: String,
        named_step: String,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Everything a worker needs, cloned cheaply per spawn.
#[derive(Debug, Clone)]
pub(crate) struct StepRunContext {
    pub context: Arc<SystemContext>,
    pub registry: Arc<HandlerRegistry>,
    pub backoff: Arc<BackoffPolicy>,
    pub task: Arc<Task>,
    pub task_name: Arc<str>,
    pub sequence: Arc<StepSequence>,
    pub correlation_id: Arc<str>,
}

pub(crate) async fn execute_single_step(
    run: StepRunContext,
    step_uuid: Uuid,
) -> Result<StepOutcome, StepExecutionError> {
    let correlation_id = run.correlation_id.as_ref();

    // Fresh readiness check right before the hand-off; the step may have
    // been claimed since the sequence snapshot was taken.
    let readiness = run
        .context
        .sql_functions()
        .get_step_readiness_for(run.task.task_uuid, step_uuid)
        .await?;
    let Some(readiness) = readiness else {
        return Ok(StepOutcome::Skipped {
            step_uuid,
            reason: "step no longer present".to_string(),
        });
    };
    if !readiness.ready_for_execution {
        return Ok(StepOutcome::Skipped {
            step_uuid,
            reason: readiness
                .blocking_reason
                .unwrap_or_else(|| "no longer ready".to_string()),
        });
    }

    let Some(step) = WorkflowStep::find_by_id(run.context.database_pool(), step_uuid)
        .await
        .map_err(|e| EngineError::database("find_workflow_step_by_id", e))?
    else {
        return Ok(StepOutcome::Skipped {
            step_uuid,
            reason: "step row vanished".to_string(),
        });
    };

    let Some(handler) = run.registry.resolve(&run.task_name, &step.named_step) else {
        return Err(StepExecutionError::HandlerMissing {
            task_name: run.task_name.to_string(),
            named_step: step.named_step,
        });
    };

    let mut machine =
        StepStateMachine::new(step, run.context.clone()).with_correlation_id(correlation_id);

    // Claim + transition to in_progress. A guard rejection here means
    // another worker won the claim; that is expected flow.
    match machine.start().await {
        Ok(_) => {}
        Err(e) if e.is_expected() => {
            debug!(
                correlation_id = %correlation_id,
                workflow_step_uuid = %step_uuid,
                reason = %e,
                "Step claim lost; skipping"
            );
            return Ok(StepOutcome::Skipped {
                step_uuid,
                reason: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    }

    debug!(
        correlation_id = %correlation_id,
        workflow_step_uuid = %step_uuid,
        named_step = %machine.step().named_step,
        attempt = machine.step().attempts + 1,
        "Invoking step handler"
    );

    match handler.call(&run.task, &run.sequence, machine.step()).await {
        Ok(results) => {
            machine.complete_with_results(Some(results)).await?;
            Ok(StepOutcome::Processed(machine.into_step()))
        }
        Err(failure) => {
            let attempts_after = machine.step().attempts + 1;
            let retry_limit = machine.step().retry_limit;
            let will_retry = failure.retryable && attempts_after < retry_limit;

            let next_retry_at = will_retry.then(|| {
                run.backoff
                    .next_retry_at(attempts_after, chrono::Utc::now().naive_utc())
            });

            warn!(
                correlation_id = %correlation_id,
                workflow_step_uuid = %step_uuid,
                named_step = %machine.step().named_step,
                attempts = attempts_after,
                retry_limit = retry_limit,
                retryable = failure.retryable,
                error = %failure.message,
                "Step handler failed"
            );

            machine
                .fail_with_error(
                    &StepErrorRecord {
                        message: failure.message.clone(),
                        error_class: failure.error_class.clone(),
                        backtrace: failure.backtrace.clone(),
                        retryable: failure.retryable,
                    },
                    next_retry_at,
                )
                .await?;

            if attempts_after >= retry_limit {
                run.context
                    .event_publisher()
                    .publish_step_max_retries_reached(machine.step(), correlation_id)
                    .await;
            }

            Ok(StepOutcome::Processed(machine.into_step()))
        }
    }
}
