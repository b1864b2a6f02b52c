//! The loaded sequence: a task's steps, edges, and current readiness,
//! fetched together so coordinator decisions see one snapshot.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use stepline_shared::database::SqlFunctionExecutor;
use stepline_shared::errors::EngineResult;
use stepline_shared::models::{StepReadiness, WorkflowStep, WorkflowStepEdge};
use stepline_shared::SystemContext;

#[derive(Debug, Clone)]
pub struct StepSequence {
    task_uuid: Uuid,
    steps: Vec<WorkflowStep>,
    edges: Vec<WorkflowStepEdge>,
    readiness: Vec<StepReadiness>,
    parents: HashMap<Uuid, Vec<Uuid>>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl StepSequence {
    /// Load steps, edges, and readiness for a task.
    pub async fn load(context: &SystemContext, task_uuid: Uuid) -> EngineResult<Self> {
        let pool = context.database_pool();
        let steps = WorkflowStep::for_task(pool, task_uuid).await?;
        let edges = WorkflowStepEdge::for_task(pool, task_uuid).await?;
        let readiness = SqlFunctionExecutor::new(pool.clone())
            .get_step_readiness(task_uuid)
            .await?;
        Ok(Self::from_parts(task_uuid, steps, edges, readiness))
    }

    pub fn from_parts(
        task_uuid: Uuid,
        steps: Vec<WorkflowStep>,
        edges: Vec<WorkflowStepEdge>,
        readiness: Vec<StepReadiness>,
    ) -> Self {
        let mut parents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for edge in &edges {
            parents.entry(edge.to_step_uuid).or_default().push(edge.from_step_uuid);
            children.entry(edge.from_step_uuid).or_default().push(edge.to_step_uuid);
        }
        Self {
            task_uuid,
            steps,
            edges,
            readiness,
            parents,
            children,
        }
    }

    pub fn task_uuid(&self) -> Uuid {
        self.task_uuid
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn edges(&self) -> &[WorkflowStepEdge] {
        &self.edges
    }

    pub fn readiness(&self) -> &[StepReadiness] {
        &self.readiness
    }

    pub fn step(&self, workflow_step_uuid: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.workflow_step_uuid == workflow_step_uuid)
    }

    pub fn readiness_for(&self, workflow_step_uuid: Uuid) -> Option<&StepReadiness> {
        self.readiness
            .iter()
            .find(|r| r.workflow_step_uuid == workflow_step_uuid)
    }

    /// Steps that may run right now.
    pub fn viable_steps(&self) -> Vec<&StepReadiness> {
        self.readiness.iter().filter(|r| r.ready_for_execution).collect()
    }

    pub fn parents_of(&self, workflow_step_uuid: Uuid) -> &[Uuid] {
        self.parents
            .get(&workflow_step_uuid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn children_of(&self, workflow_step_uuid: Uuid) -> &[Uuid] {
        self.children
            .get(&workflow_step_uuid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<Uuid> {
        self.steps
            .iter()
            .map(|s| s.workflow_step_uuid)
            .filter(|uuid| self.parents_of(*uuid).is_empty())
            .collect()
    }

    /// Topological walk from the roots (Kahn's algorithm, iterative).
    /// Each step is emitted exactly once; the DAG invariant makes a
    /// revisit or a leftover a template-analyzer escape, so both assert in
    /// debug builds and the walk stays truncated rather than looping.
    pub fn walk(&self) -> Vec<Uuid> {
        let mut indegree: HashMap<Uuid, usize> = self
            .steps
            .iter()
            .map(|s| (s.workflow_step_uuid, self.parents_of(s.workflow_step_uuid).len()))
            .collect();

        let mut queue: VecDeque<Uuid> = self.roots().into();
        let mut emitted: HashSet<Uuid> = HashSet::new();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(step_uuid) = queue.pop_front() {
            let newly_emitted = emitted.insert(step_uuid);
            debug_assert!(newly_emitted, "step {step_uuid} re-entered the walk");
            if !newly_emitted {
                continue;
            }
            order.push(step_uuid);
            for child in self.children_of(step_uuid) {
                let remaining = indegree.entry(*child).or_insert(0);
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    queue.push_back(*child);
                }
            }
        }

        debug_assert_eq!(
            order.len(),
            self.steps.len(),
            "walk left steps unreached; the edge set is not a DAG"
        );
        order
    }

    /// All transitive successors of a step.
    pub fn descendants_of(&self, workflow_step_uuid: Uuid) -> HashSet<Uuid> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<Uuid> = self.children_of(workflow_step_uuid).to_vec();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.children_of(next).iter().copied());
            }
        }
        seen
    }

    /// Steps not yet in a terminal-success state, in walk order.
    pub fn incomplete_steps(&self) -> HashSet<Uuid> {
        self.walk()
            .into_iter()
            .filter(|uuid| {
                self.readiness_for(*uuid)
                    .map(|r| !r.state().is_terminal_success())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Longest path (in edges) from a step to any sink.
    pub fn path_length_from(&self, workflow_step_uuid: Uuid) -> usize {
        let mut memo: HashMap<Uuid, usize> = HashMap::new();
        // Reverse walk order guarantees children resolve before parents.
        for step_uuid in self.walk().into_iter().rev() {
            let longest_child = self
                .children_of(step_uuid)
                .iter()
                .filter_map(|c| memo.get(c).map(|len| len + 1))
                .max()
                .unwrap_or(0);
            memo.insert(step_uuid, longest_child);
        }
        memo.get(&workflow_step_uuid).copied().unwrap_or(0)
    }
}
