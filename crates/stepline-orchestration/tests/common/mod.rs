//! Shared helpers for the orchestration scenarios: scripted handlers, a
//! recording job queue, and context wiring with a capturing event sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use stepline_orchestration::coordinator::sequence::StepSequence;
use stepline_orchestration::handler::{HandlerResult, StepFailure, StepHandler};
use stepline_orchestration::reenqueuer::JobQueue;
use stepline_shared::config::EngineConfig;
use stepline_shared::errors::EngineResult;
use stepline_shared::events::{CapturingEventAdapter, EventPublisher};
use stepline_shared::models::{Task, WorkflowStep};
use stepline_shared::SystemContext;

/// Context with a capturing event adapter wired in.
pub fn build_context(
    pool: sqlx::PgPool,
    config: EngineConfig,
) -> (Arc<SystemContext>, Arc<CapturingEventAdapter>) {
    let adapter = Arc::new(CapturingEventAdapter::new());
    let publisher = EventPublisher::with_adapters(vec![adapter.clone()]);
    let context = Arc::new(SystemContext::from_parts(pool, config, publisher));
    (context, adapter)
}

/// Backoff pinned for deterministic retry tests.
pub fn config_with_backoff(progression: Vec<u32>) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.backoff.default_backoff_seconds = progression;
    config.backoff.jitter_enabled = false;
    config
}

/// Handler that always succeeds.
#[derive(Debug)]
pub struct OkHandler;

#[async_trait]
impl StepHandler for OkHandler {
    async fn call(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> HandlerResult {
        Ok(json!({"ok": true, "step": step.named_step}))
    }
}

/// Handler that fails its first `failures` attempts, then succeeds.
#[derive(Debug)]
pub struct FailTimesHandler {
    pub failures: i32,
}

#[async_trait]
impl StepHandler for FailTimesHandler {
    async fn call(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> HandlerResult {
        if step.attempts < self.failures {
            Err(StepFailure::retryable(format!(
                "induced failure on attempt {}",
                step.attempts + 1
            )))
        } else {
            Ok(json!({"recovered_after": step.attempts}))
        }
    }
}

/// Handler that sleeps longer than any batch timeout under test.
#[derive(Debug)]
pub struct SleepHandler {
    pub duration: Duration,
}

#[async_trait]
impl StepHandler for SleepHandler {
    async fn call(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> HandlerResult {
        tokio::time::sleep(self.duration).await;
        Ok(json!({"slept_ms": self.duration.as_millis() as u64}))
    }
}

/// Queue double that records every enqueue instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct RecordingQueue {
    records: Arc<Mutex<Vec<(Uuid, Option<Duration>)>>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Uuid, Option<Duration>)> {
        self.records.lock().expect("queue records poisoned").clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, task_uuid: Uuid) -> EngineResult<()> {
        self.records
            .lock()
            .expect("queue records poisoned")
            .push((task_uuid, None));
        Ok(())
    }

    async fn enqueue_after(&self, task_uuid: Uuid, delay: Duration) -> EngineResult<()> {
        self.records
            .lock()
            .expect("queue records poisoned")
            .push((task_uuid, Some(delay)));
        Ok(())
    }
}
