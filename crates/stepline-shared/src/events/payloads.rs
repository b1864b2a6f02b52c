//! Event envelope and internal payload builders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::core::task::Task;
use crate::models::core::workflow_step::WorkflowStep;

/// The unit handed to every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            payload,
        }
    }
}

pub(crate) fn task_payload(task: &Task, extra: Option<Value>) -> Value {
    let mut payload = json!({
        "task_uuid": task.task_uuid,
        "named_task_uuid": task.named_task_uuid,
        "status": task.status,
        "complete": task.complete,
        "requested_at": task.requested_at.and_utc().to_rfc3339(),
        "initiator": task.initiator,
        "source_system": task.source_system,
        "reason": task.reason,
    });
    merge(&mut payload, extra);
    payload
}

pub(crate) fn step_payload(step: &WorkflowStep, extra: Option<Value>) -> Value {
    let mut payload = json!({
        "workflow_step_uuid": step.workflow_step_uuid,
        "task_uuid": step.task_uuid,
        "named_step": step.named_step,
        "status": step.status,
        "attempts": step.attempts,
        "retry_limit": step.retry_limit,
        "retryable": step.retryable,
        "inputs": step.inputs,
        "results": step.results,
        "last_attempted_at": step.last_attempted_at.map(|t| t.and_utc().to_rfc3339()),
        "next_retry_at": step.next_retry_at.map(|t| t.and_utc().to_rfc3339()),
    });
    merge(&mut payload, extra);
    payload
}

pub(crate) fn transition_payload(
    entity: &str,
    entity_uuid: uuid::Uuid,
    from_state: Option<String>,
    to_state: String,
) -> Value {
    json!({
        "entity": entity,
        "entity_uuid": entity_uuid,
        "from_state": from_state,
        "to_state": to_state,
    })
}

fn merge(payload: &mut Value, extra: Option<Value>) {
    if let (Some(base), Some(Value::Object(extra))) = (payload.as_object_mut(), extra) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
}
