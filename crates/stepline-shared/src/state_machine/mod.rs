//! # Task and Step State Machines
//!
//! The only legal writers of the derived `status` columns. Legality is a
//! static table over `(current, target)`; dynamic guards (dependency gates,
//! completion checks) run inside the same database transaction that appends
//! the transition row, flips `most_recent`, and updates the derived column.
//!
//! Guard failures are expected control flow: callers match on
//! [`TransitionError::GuardFailed`](crate::errors::TransitionError) and
//! carry on. Event emission is best-effort and never blocks a transition.

pub mod events;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;

pub use states::{StepState, TaskState};
pub use step_state_machine::{StepErrorRecord, StepStateMachine};
pub use task_state_machine::TaskStateMachine;
