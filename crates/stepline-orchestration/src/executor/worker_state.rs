//! Worker state classification.
//!
//! A thin value type over the six worker states with the pure predicates
//! batch cleanup keys on. The cell is an atomic so the batch scheduler can
//! classify workers without joining them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Created but not yet handed to the runtime.
    Unscheduled = 0,
    /// Spawned, not yet running.
    Pending = 1,
    /// Running user work.
    Executing = 2,
    /// Finished with a result.
    Fulfilled = 3,
    /// Finished with an error.
    Rejected = 4,
    /// Cancelled before it started.
    Cancelled = 5,
}

impl WorkerState {
    /// Cleanup should request cancellation: the worker has not started.
    pub fn should_cancel(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Cleanup should wait (bounded): the worker is mid-flight.
    pub fn should_wait(&self) -> bool {
        matches!(self, Self::Executing)
    }

    /// Cleanup can release the worker without action.
    pub fn can_ignore(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled | Self::Unscheduled)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unscheduled,
            1 => Self::Pending,
            2 => Self::Executing,
            3 => Self::Fulfilled,
            4 => Self::Rejected,
            _ => Self::Cancelled,
        }
    }
}

/// Shared, lock-free state cell for one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStateCell(Arc<AtomicU8>);

impl WorkerStateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Unscheduled as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Compare-and-swap advance; false when another party moved first.
    pub fn try_advance(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WorkerState; 6] = [
        WorkerState::Unscheduled,
        WorkerState::Pending,
        WorkerState::Executing,
        WorkerState::Fulfilled,
        WorkerState::Rejected,
        WorkerState::Cancelled,
    ];

    #[test]
    fn predicates_partition_as_specified() {
        for state in ALL {
            assert_eq!(state.should_cancel(), state == WorkerState::Pending);
            assert_eq!(state.should_wait(), state == WorkerState::Executing);
            assert_eq!(
                state.can_ignore(),
                matches!(
                    state,
                    WorkerState::Fulfilled | WorkerState::Cancelled | WorkerState::Unscheduled
                )
            );
        }
    }

    #[test]
    fn rejected_is_neither_cancelled_waited_nor_ignored() {
        let rejected = WorkerState::Rejected;
        assert!(!rejected.should_cancel());
        assert!(!rejected.should_wait());
        assert!(!rejected.can_ignore());
    }

    #[test]
    fn cells_advance_exactly_once() {
        let cell = WorkerStateCell::new();
        assert_eq!(cell.get(), WorkerState::Unscheduled);

        cell.store(WorkerState::Pending);
        assert!(cell.try_advance(WorkerState::Pending, WorkerState::Executing));
        assert!(!cell.try_advance(WorkerState::Pending, WorkerState::Executing));
        assert_eq!(cell.get(), WorkerState::Executing);
    }

    #[test]
    fn cancel_and_start_race_has_one_winner() {
        let cell = WorkerStateCell::new();
        cell.store(WorkerState::Pending);

        let started = cell.try_advance(WorkerState::Pending, WorkerState::Executing);
        let cancelled = cell.try_advance(WorkerState::Pending, WorkerState::Cancelled);
        assert!(started ^ cancelled);
    }
}
