//! Engine Error Types
//!
//! The shared error vocabulary for the engine. Guard failures are modeled
//! separately from infrastructure failures: a rejected state transition is
//! expected control flow and callers routinely match on it, while database
//! and configuration errors bubble up to the outer driver.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the engine crates.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("workflow step {0} not found")]
    StepNotFound(Uuid),

    #[error("job queue error: {0}")]
    Queue(String),
}

impl EngineError {
    /// Wrap a database error with the operation that produced it.
    pub fn database(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(source: sqlx::Error) -> Self {
        Self::Database {
            operation: "query".to_string(),
            source,
        }
    }
}

/// Errors raised by the task and step state machines.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The `(from, to)` pair is not in the machine's transition table.
    #[error("{entity} transition {from:?} -> {to} is not allowed")]
    NotAllowed {
        entity: &'static str,
        from: Option<String>,
        to: String,
    },

    /// The pair is legal but a dynamic guard rejected it.
    #[error("{entity} transition {from:?} -> {to} rejected: {reason}")]
    GuardFailed {
        entity: &'static str,
        from: Option<String>,
        to: String,
        reason: String,
    },

    /// A stored `to_state` label failed to parse into the closed state set.
    #[error("stored state label {0:?} is not in the closed state set")]
    CorruptState(String),

    #[error("database error during state transition: {0}")]
    Database(#[from] sqlx::Error),
}

impl TransitionError {
    /// True for expected-flow rejections (illegal pair or failed guard),
    /// false for infrastructure failures.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotAllowed { .. } | Self::GuardFailed { .. })
    }
}

/// Error for state labels that are not in the closed state set.
#[derive(Debug, Clone, Error)]
#[error("unknown state label: {0}")]
pub struct ParseStateError(pub String);
