//! # Step Executor
//!
//! Runs viable steps in concurrent batches. Concurrency is sized
//! dynamically from system health, each batch is awaited under a derived
//! timeout, and cleanup always runs: pending workers are cancelled,
//! executing workers get a bounded grace wait and are then abandoned
//! (their eventual completion is observed from the store on a later
//! coordinator pass). A batch timeout never fails the task.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use stepline_shared::models::{Task, WorkflowStep};
use stepline_shared::SystemContext;

use crate::backoff::BackoffPolicy;
use crate::coordinator::sequence::StepSequence;
use crate::handler::HandlerRegistry;

pub mod concurrency;
pub mod memory;
pub mod step_runner;
pub mod worker_state;

pub use concurrency::ConcurrencyGovernor;
pub use memory::MemoryMaintenance;
pub use step_runner::{StepExecutionError, StepOutcome};
pub use worker_state::{WorkerState, WorkerStateCell};

use step_runner::{execute_single_step, StepRunContext};

type WorkerOutput = Option<Result<StepOutcome, StepExecutionError>>;

struct WorkerHandle {
    step_uuid: Uuid,
    state: WorkerStateCell,
    cancel: CancellationToken,
    join: JoinHandle<WorkerOutput>,
}

/// What one `execute` call did.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Steps attempted this call, success and failure outcomes alike.
    pub processed: Vec<WorkflowStep>,
    pub batches: u32,
    pub timed_out_batches: u32,
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    context: Arc<SystemContext>,
    governor: ConcurrencyGovernor,
    backoff: Arc<BackoffPolicy>,
    memory: Arc<Mutex<MemoryMaintenance>>,
}

impl StepExecutor {
    pub fn new(context: Arc<SystemContext>) -> Self {
        let governor = ConcurrencyGovernor::new(context.clone());
        let backoff = Arc::new(BackoffPolicy::new(context.config().backoff.clone()));
        let memory = Arc::new(Mutex::new(MemoryMaintenance::new(
            &context.config().execution,
        )));
        Self {
            context,
            governor,
            backoff,
            memory,
        }
    }

    /// Run the viable steps in batches of at most the current dynamic
    /// concurrency. Worker-level failures are logged and reflected in the
    /// store, never raised.
    pub async fn execute(
        &self,
        task: Arc<Task>,
        task_name: Arc<str>,
        sequence: Arc<StepSequence>,
        viable: Vec<Uuid>,
        registry: Arc<HandlerRegistry>,
        correlation_id: &str,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if viable.is_empty() {
            return report;
        }

        let max_concurrent = self.governor.max_concurrent().await;
        debug!(
            correlation_id = %correlation_id,
            task_uuid = %task.task_uuid,
            viable = viable.len(),
            max_concurrent,
            "Executing viable steps"
        );

        let run = StepRunContext {
            context: self.context.clone(),
            registry,
            backoff: self.backoff.clone(),
            task,
            task_name,
            sequence,
            correlation_id: Arc::from(correlation_id),
        };

        for batch in viable.chunks(max_concurrent) {
            let (steps, timed_out) = self.run_batch(&run, batch).await;
            report.processed.extend(steps);
            report.batches += 1;
            if timed_out {
                report.timed_out_batches += 1;
            }
        }
        report
    }

    async fn run_batch(
        &self,
        run: &StepRunContext,
        batch: &[Uuid],
    ) -> (Vec<WorkflowStep>, bool) {
        let config = &self.context.config().execution;
        let batch_timeout = config.batch_timeout_for(batch.len());
        let correlation_id = run.correlation_id.clone();
        let started = Instant::now();

        debug!(
            correlation_id = %correlation_id,
            batch_size = batch.len(),
            batch_timeout_seconds = batch_timeout.as_secs(),
            "Starting batch"
        );

        let mut handles: Vec<WorkerHandle> = batch
            .iter()
            .map(|step_uuid| Self::spawn_worker(run.clone(), *step_uuid))
            .collect();

        let mut processed = Vec::new();
        let mut timed_out = false;

        let collection = {
            let join_all =
                futures::future::join_all(handles.iter_mut().map(|h| &mut h.join));
            tokio::time::timeout(batch_timeout, join_all).await
        };

        match collection {
            Ok(results) => {
                for (handle, result) in handles.iter().zip(results) {
                    Self::collect(handle.step_uuid, result, &mut processed, &correlation_id);
                }
            }
            Err(_) => {
                timed_out = true;
                warn!(
                    correlation_id = %correlation_id,
                    batch_timeout_seconds = batch_timeout.as_secs(),
                    "Batch collection timed out; harvesting finished workers"
                );
                for handle in handles.iter_mut() {
                    let state = handle.state.get();
                    if matches!(state, WorkerState::Fulfilled | WorkerState::Rejected) {
                        if let Some(result) = (&mut handle.join).now_or_never() {
                            Self::collect(
                                handle.step_uuid,
                                result,
                                &mut processed,
                                &correlation_id,
                            );
                        }
                    }
                }
            }
        }

        self.cleanup(&mut handles, &correlation_id).await;

        let batch_duration = started.elapsed();
        if let Ok(mut maintenance) = self.memory.lock() {
            maintenance.maybe_reclaim(batch.len(), batch_duration, &correlation_id);
        }

        (processed, timed_out)
    }

    fn spawn_worker(run: StepRunContext, step_uuid: Uuid) -> WorkerHandle {
        let state = WorkerStateCell::new();
        let cancel = CancellationToken::new();

        let worker_state = state.clone();
        let worker_cancel = cancel.clone();
        state.store(WorkerState::Pending);

        let join = tokio::spawn(async move {
            if worker_cancel.is_cancelled() {
                worker_state.store(WorkerState::Cancelled);
                return None;
            }
            if !worker_state.try_advance(WorkerState::Pending, WorkerState::Executing) {
                worker_state.store(WorkerState::Cancelled);
                return None;
            }
            let result = execute_single_step(run, step_uuid).await;
            match &result {
                Ok(_) => worker_state.store(WorkerState::Fulfilled),
                Err(_) => worker_state.store(WorkerState::Rejected),
            }
            Some(result)
        });

        WorkerHandle {
            step_uuid,
            state,
            cancel,
            join,
        }
    }

    fn collect(
        step_uuid: Uuid,
        result: Result<WorkerOutput, tokio::task::JoinError>,
        processed: &mut Vec<WorkflowStep>,
        correlation_id: &str,
    ) {
        match result {
            Ok(Some(Ok(StepOutcome::Processed(step)))) => processed.push(step),
            Ok(Some(Ok(StepOutcome::Skipped { reason, .. }))) => {
                debug!(
                    correlation_id = %correlation_id,
                    workflow_step_uuid = %step_uuid,
                    reason = %reason,
                    "Step skipped"
                );
            }
            Ok(Some(Err(e))) => {
                warn!(
                    correlation_id = %correlation_id,
                    workflow_step_uuid = %step_uuid,
                    error = %e,
                    "Step worker rejected"
                );
            }
            Ok(None) => {
                debug!(
                    correlation_id = %correlation_id,
                    workflow_step_uuid = %step_uuid,
                    "Step worker cancelled before start"
                );
            }
            Err(join_error) => {
                warn!(
                    correlation_id = %correlation_id,
                    workflow_step_uuid = %step_uuid,
                    error = %join_error,
                    "Step worker did not complete"
                );
            }
        }
    }

    /// Always runs, timeout or not: cancel pending workers, give executing
    /// workers a bounded grace wait, release the rest.
    async fn cleanup(&self, handles: &mut [WorkerHandle], correlation_id: &str) {
        let wait = self.context.config().execution.future_cleanup_wait();
        for handle in handles.iter_mut() {
            let state = handle.state.get();
            if state.should_cancel() {
                handle.cancel.cancel();
                debug!(
                    correlation_id = %correlation_id,
                    workflow_step_uuid = %handle.step_uuid,
                    "Cancellation requested for pending worker"
                );
            } else if state.should_wait() {
                match tokio::time::timeout(wait, &mut handle.join).await {
                    Ok(_) => debug!(
                        correlation_id = %correlation_id,
                        workflow_step_uuid = %handle.step_uuid,
                        "In-flight worker finished during the cleanup window"
                    ),
                    Err(_) => warn!(
                        correlation_id = %correlation_id,
                        workflow_step_uuid = %handle.step_uuid,
                        "Abandoning in-flight worker; completion will surface from the store"
                    ),
                }
            }
            // Fulfilled, rejected, cancelled, and unscheduled workers are
            // simply released.
        }
    }
}
