//! Step handler contract and registry.
//!
//! Handlers are user code. They receive the task, the loaded sequence, and
//! the step being executed; they write their output into the step's results
//! by returning it. Raising classifies the failure: retryable failures get
//! a `next_retry_at`, permanent ones clear the retryable flag so the task
//! can finalize to error. Handlers must be idempotent; the engine provides
//! at-least-once execution with bounded retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use stepline_shared::models::{Task, WorkflowStep};

use crate::coordinator::sequence::StepSequence;

/// A classified step failure raised by a handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
    pub error_class: Option<String>,
    pub backtrace: Option<String>,
    pub retryable: bool,
}

impl StepFailure {
    /// Transient failure; the step retries on its backoff schedule.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_class: None,
            backtrace: None,
            retryable: true,
        }
    }

    /// Permanent failure; no retry regardless of remaining budget.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_class: None,
            backtrace: None,
            retryable: false,
        }
    }

    pub fn with_error_class(mut self, error_class: impl Into<String>) -> Self {
        self.error_class = Some(error_class.into());
        self
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }
}

pub type HandlerResult = Result<Value, StepFailure>;

/// One unit of user work.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, task: &Task, sequence: &StepSequence, step: &WorkflowStep)
        -> HandlerResult;
}

/// Handlers keyed by `namespace.name@version` plus step name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_name: &str,
        step_name: &str,
        handler: Arc<dyn StepHandler>,
    ) {
        self.handlers.insert(Self::key(task_name, step_name), handler);
    }

    pub fn resolve(&self, task_name: &str, step_name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&Self::key(task_name, step_name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn key(task_name: &str, step_name: &str) -> String {
        format!("{task_name}/{step_name}")
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("keys", &keys).finish()
    }
}
