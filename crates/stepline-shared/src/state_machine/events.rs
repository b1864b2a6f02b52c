//! Lifecycle event names, keyed by transition edge.

use super::states::{StepState, TaskState};

/// Event name for a task transition. `from = None` is the initial
/// transition into the machine.
pub fn task_event_name(from: Option<TaskState>, to: TaskState) -> &'static str {
    use TaskState::*;
    match (from, to) {
        (None, Pending) => "initialize_requested",
        (Some(Pending), InProgress) => "start_requested",
        (Some(InProgress), Complete) => "completed",
        (Some(InProgress), Error) => "failed",
        (Some(InProgress), Pending) => "reenqueue_requested",
        (Some(Error), Pending) => "retry_requested",
        (Some(Error), ResolvedManually) => "resolved_manually",
        (_, Cancelled) => "cancelled",
        _ => "transitioned",
    }
}

/// Event name for a step transition.
pub fn step_event_name(from: Option<StepState>, to: StepState) -> &'static str {
    use StepState::*;
    match (from, to) {
        (None, Pending) => "initialize_requested",
        (Some(Pending), InProgress) => "execution_requested",
        (Some(InProgress), Complete) => "completed",
        (Some(InProgress), Error) => "failed",
        (Some(Error), Pending) => "retry_requested",
        (Some(Error), ResolvedManually) => "resolved_manually",
        (_, Cancelled) => "cancelled",
        _ => "transitioned",
    }
}
