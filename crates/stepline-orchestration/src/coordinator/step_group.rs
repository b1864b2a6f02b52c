//! Step group evaluation for finalization.
//!
//! Compares the set of steps that were incomplete when the coordinator
//! picked the task up against what actually happened this pass, and exposes
//! the two predicates the finalization decision table keys on.

use std::collections::HashSet;

use uuid::Uuid;

use stepline_shared::models::WorkflowStep;
use stepline_shared::state_machine::StepState;

use super::sequence::StepSequence;

#[derive(Debug, Clone)]
pub struct StepGroup {
    prior_incomplete: HashSet<Uuid>,
    this_pass_complete: HashSet<Uuid>,
    still_incomplete: HashSet<Uuid>,
    still_working: HashSet<Uuid>,
}

impl StepGroup {
    /// Evaluate against a freshly reloaded sequence. `processed` is every
    /// step the executor ran this pass, across all batches.
    pub fn build(
        sequence: &StepSequence,
        prior_incomplete: &HashSet<Uuid>,
        processed: &[WorkflowStep],
    ) -> Self {
        let processed_uuids: HashSet<Uuid> =
            processed.iter().map(|s| s.workflow_step_uuid).collect();

        let this_pass_complete: HashSet<Uuid> = processed_uuids
            .iter()
            .copied()
            .filter(|uuid| {
                sequence
                    .readiness_for(*uuid)
                    .map(|r| r.state().is_terminal_success())
                    .unwrap_or(false)
            })
            .collect();

        let still_incomplete: HashSet<Uuid> = prior_incomplete
            .difference(&this_pass_complete)
            .copied()
            .collect();

        let still_working: HashSet<Uuid> = still_incomplete
            .iter()
            .copied()
            .filter(|uuid| {
                sequence
                    .readiness_for(*uuid)
                    .map(|r| match r.state() {
                        StepState::Pending | StepState::InProgress => true,
                        StepState::Error => r.has_remaining_retries(),
                        _ => false,
                    })
                    .unwrap_or(false)
            })
            .collect();

        Self {
            prior_incomplete: prior_incomplete.clone(),
            this_pass_complete,
            still_incomplete,
            still_working,
        }
    }

    /// Nothing was incomplete to begin with, or everything incomplete got
    /// finished this pass.
    pub fn is_complete(&self) -> bool {
        self.prior_incomplete.is_empty() || self.still_incomplete.is_empty()
    }

    /// Something is still pending, running, or waiting on a retry budget.
    pub fn is_pending(&self) -> bool {
        !self.still_working.is_empty()
    }

    pub fn prior_incomplete(&self) -> &HashSet<Uuid> {
        &self.prior_incomplete
    }

    pub fn this_pass_complete(&self) -> &HashSet<Uuid> {
        &self.this_pass_complete
    }

    pub fn still_incomplete(&self) -> &HashSet<Uuid> {
        &self.still_incomplete
    }

    pub fn still_working(&self) -> &HashSet<Uuid> {
        &self.still_working
    }
}
