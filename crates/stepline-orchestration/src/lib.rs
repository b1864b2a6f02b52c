//! # stepline-orchestration
//!
//! The execution side of the engine: the [`WorkflowCoordinator`] drives a
//! task's retry/finalize loop, the [`StepExecutor`] runs viable steps in
//! dynamically sized concurrent batches, and the [`TaskReenqueuer`] hands
//! tasks back to the job queue when they cannot complete yet.
//!
//! One coordinator per task at a time is assumed; external serialization
//! (one active queue job per task) enforces it. Steps defend themselves
//! against races through the `in_process` claim flag re-checked from fresh
//! readiness immediately before execution.

pub mod analysis;
pub mod backoff;
pub mod coordinator;
pub mod executor;
pub mod handler;
pub mod reenqueuer;

pub use backoff::BackoffPolicy;
pub use coordinator::{CoordinationAction, CoordinationOutcome, WorkflowCoordinator};
pub use executor::StepExecutor;
pub use handler::{HandlerRegistry, StepFailure, StepHandler};
pub use reenqueuer::{InProcessJobQueue, JobQueue, TaskReenqueuer};
