//! Bottleneck scoring over a loaded sequence.
//!
//! Scores rank steps by how much of the graph they are holding up: fan-out
//! below them, descendants they are blocking, and remaining path length,
//! shifted by state penalties and severity multipliers. Pure computation;
//! callers cache through [`super::cache::AnalysisCache`].

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use stepline_shared::config::DependencyAnalysisConfig;
use stepline_shared::state_machine::StepState;

use crate::coordinator::sequence::StepSequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepScore {
    pub workflow_step_uuid: Uuid,
    pub named_step: String,
    pub score: f64,
    pub severity: Severity,
    pub downstream_count: usize,
    pub blocked_descendants: usize,
    pub path_length: usize,
    pub dependency_level: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub task_uuid: Uuid,
    /// Highest score first.
    pub scores: Vec<StepScore>,
    pub estimated_completion: Duration,
}

impl AnalysisReport {
    pub fn top_bottleneck(&self) -> Option<&StepScore> {
        self.scores.first()
    }
}

#[derive(Debug, Clone)]
pub struct BottleneckAnalyzer {
    config: DependencyAnalysisConfig,
}

impl BottleneckAnalyzer {
    pub fn new(config: DependencyAnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        sequence: &StepSequence,
        levels: &HashMap<Uuid, i32>,
    ) -> AnalysisReport {
        let mut scores: Vec<StepScore> = sequence
            .readiness()
            .iter()
            .map(|readiness| {
                let step_uuid = readiness.workflow_step_uuid;
                let descendants = sequence.descendants_of(step_uuid);
                let blocked_descendants = descendants
                    .iter()
                    .filter(|uuid| {
                        sequence
                            .readiness_for(**uuid)
                            .map(|r| !r.dependencies_satisfied)
                            .unwrap_or(false)
                    })
                    .count();
                let path_length = sequence.path_length_from(step_uuid);

                let score = self.score_step(
                    readiness.state(),
                    readiness.permanently_blocked(),
                    readiness.has_remaining_retries(),
                    !readiness.dependencies_satisfied,
                    descendants.len(),
                    blocked_descendants,
                    path_length,
                );

                StepScore {
                    workflow_step_uuid: step_uuid,
                    named_step: readiness.named_step.clone(),
                    score,
                    severity: self.severity_for(score),
                    downstream_count: descendants.len(),
                    blocked_descendants,
                    path_length,
                    dependency_level: levels.get(&step_uuid).copied().unwrap_or(0),
                }
            })
            .collect();

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        AnalysisReport {
            task_uuid: sequence.task_uuid(),
            estimated_completion: self.estimate_completion(sequence, levels),
            scores,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn score_step(
        &self,
        state: StepState,
        permanently_blocked: bool,
        retry_pending: bool,
        dependency_issue: bool,
        downstream: usize,
        blocked: usize,
        path_length: usize,
    ) -> f64 {
        let weights = &self.config.weights;
        let severity = &self.config.severity;

        let mut score = downstream as f64 * weights.downstream
            + blocked as f64 * weights.blocked
            + path_length as f64 * weights.path_length;

        if state.is_terminal_success() {
            score = (score - weights.completed_penalty).max(0.0);
        }
        if permanently_blocked {
            score += weights.blocked_penalty;
        }
        if state == StepState::Error {
            score += weights.error_penalty;
        }
        if retry_pending {
            score += weights.retry_penalty;
        }

        if state == StepState::Error {
            let mut multiplier = severity.error_state;
            if permanently_blocked {
                multiplier += severity.exhausted_retry_bonus;
            }
            score *= multiplier;
        }
        if dependency_issue {
            score *= severity.dependency_issue;
        }

        score
    }

    fn severity_for(&self, score: f64) -> Severity {
        let thresholds = &self.config.thresholds;
        if score >= thresholds.critical {
            Severity::Critical
        } else if score >= thresholds.high {
            Severity::High
        } else if score >= thresholds.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Remaining work estimate: one base unit per unfinished dependency
    /// level, plus penalties for errored steps and pending retries.
    fn estimate_completion(
        &self,
        sequence: &StepSequence,
        levels: &HashMap<Uuid, i32>,
    ) -> Duration {
        let durations = &self.config.durations;

        let remaining_levels: usize = sequence
            .readiness()
            .iter()
            .filter(|r| !r.state().is_terminal_success())
            .filter_map(|r| levels.get(&r.workflow_step_uuid))
            .collect::<std::collections::HashSet<_>>()
            .len();
        let errored = sequence
            .readiness()
            .iter()
            .filter(|r| r.state() == StepState::Error)
            .count();
        let retry_pending = sequence
            .readiness()
            .iter()
            .filter(|r| r.has_remaining_retries())
            .count();

        Duration::from_secs(
            remaining_levels as u64 * durations.base_step_seconds
                + errored as u64 * durations.error_penalty_seconds
                + retry_pending as u64 * durations.retry_penalty_seconds,
        )
    }
}
