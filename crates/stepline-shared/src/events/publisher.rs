//! The event publisher.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::core::task::Task;
use crate::models::core::workflow_step::WorkflowStep;

use super::adapter::EventAdapter;
use super::payloads::{self, EventEnvelope};

/// Fans one envelope out to every registered adapter. Failures never
/// propagate past the warn log.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    adapters: Vec<Arc<dyn EventAdapter>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(adapters: Vec<Arc<dyn EventAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn add_adapter(&mut self, adapter: Arc<dyn EventAdapter>) {
        self.adapters.push(adapter);
    }

    /// Emitted before a transition commits.
    pub async fn publish_before_transition(
        &self,
        entity: &str,
        entity_uuid: Uuid,
        from_state: Option<String>,
        to_state: String,
        correlation_id: &str,
    ) {
        let payload = payloads::transition_payload(entity, entity_uuid, from_state, to_state);
        self.dispatch(format!("{entity}.before_transition"), correlation_id, payload)
            .await;
    }

    /// Emitted after a task transition commits; `event` comes from the
    /// transition table and `extra` is the transition metadata.
    pub async fn publish_task_transition(&self, event: &str, task: &Task, extra: Option<Value>) {
        let payload = payloads::task_payload(task, extra);
        self.dispatch(format!("task.{event}"), &task.correlation_id, payload)
            .await;
    }

    /// Emitted after a step transition commits.
    pub async fn publish_step_transition(
        &self,
        event: &str,
        step: &WorkflowStep,
        correlation_id: &str,
        extra: Option<Value>,
    ) {
        let payload = payloads::step_payload(step, extra);
        self.dispatch(format!("step.{event}"), correlation_id, payload)
            .await;
    }

    /// Coordinator boundary event: the handle loop picked the task up.
    pub async fn publish_task_started(&self, task: &Task) {
        let payload = payloads::task_payload(task, None);
        self.dispatch("task.start".to_string(), &task.correlation_id, payload)
            .await;
    }

    /// Reenqueuer boundary event.
    pub async fn publish_task_reenqueued(
        &self,
        task: &Task,
        delay_seconds: Option<u64>,
        reason: &str,
    ) {
        let payload = payloads::task_payload(task, Some(serde_json::json!({
            "delay_seconds": delay_seconds,
            "reason": reason,
        })));
        self.dispatch("task.reenqueued".to_string(), &task.correlation_id, payload)
            .await;
    }

    /// Executor boundary event: a step exhausted its retry budget.
    pub async fn publish_step_max_retries_reached(
        &self,
        step: &WorkflowStep,
        correlation_id: &str,
    ) {
        let payload = payloads::step_payload(step, None);
        self.dispatch(
            "step.max_retries_reached".to_string(),
            correlation_id,
            payload,
        )
        .await;
    }

    async fn dispatch(&self, event_type: String, correlation_id: &str, payload: Value) {
        if self.adapters.is_empty() {
            return;
        }
        let envelope = EventEnvelope::new(event_type, correlation_id, payload);
        for adapter in &self.adapters {
            if let Err(e) = adapter.record(&envelope).await {
                warn!(
                    adapter = adapter.name(),
                    event_type = %envelope.event_type,
                    error = %e,
                    "Event adapter failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::adapter::{AdapterError, CapturingEventAdapter};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FailingAdapter;

    #[async_trait]
    impl EventAdapter for FailingAdapter {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn record(&self, _event: &EventEnvelope) -> Result<(), AdapterError> {
            Err(AdapterError {
                adapter: "failing".to_string(),
                reason: "sink unavailable".to_string(),
            })
        }
    }

    fn sample_task() -> Task {
        Task {
            task_uuid: Uuid::now_v7(),
            named_task_uuid: Uuid::now_v7(),
            complete: false,
            status: "pending".to_string(),
            requested_at: chrono::Utc::now().naive_utc(),
            initiator: None,
            source_system: None,
            reason: None,
            tags: None,
            bypass_steps: None,
            context: None,
            correlation_id: "tsk_1_cafecafe".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn adapter_failures_do_not_stop_the_fan_out() {
        let capturing = Arc::new(CapturingEventAdapter::new());
        let publisher = EventPublisher::with_adapters(vec![
            Arc::new(FailingAdapter),
            capturing.clone(),
        ]);

        publisher.publish_task_started(&sample_task()).await;

        assert_eq!(capturing.count_of("task.start"), 1);
    }

    #[tokio::test]
    async fn envelopes_carry_the_correlation_id() {
        let capturing = Arc::new(CapturingEventAdapter::new());
        let publisher = EventPublisher::with_adapters(vec![capturing.clone()]);

        let task = sample_task();
        publisher.publish_task_reenqueued(&task, Some(4), "steps in backoff").await;

        let events = capturing.captured();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, task.correlation_id);
        assert_eq!(events[0].payload["delay_seconds"], 4);
        assert_eq!(events[0].payload["reason"], "steps in backoff");
    }
}
