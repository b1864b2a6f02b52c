//! Factories for namespaces, templates, tasks, steps, and edges.
//!
//! Steps are created with their initial pending transition so histories
//! read the way production rows do. Tasks are left without transition
//! history; tests drive the task machine explicitly when they need it.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::core::named_task::{NamedTask, NewNamedTask};
use crate::models::core::task::{NewTask, Task};
use crate::models::core::task_namespace::TaskNamespace;
use crate::models::core::workflow_step::{NewWorkflowStep, WorkflowStep};
use crate::models::core::workflow_step_edge::WorkflowStepEdge;
use crate::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};

pub const FACTORY_NAMESPACE: &str = "factory";

pub async fn create_namespace(pool: &PgPool, name: &str) -> Result<TaskNamespace, sqlx::Error> {
    TaskNamespace::find_or_create(pool, name).await
}

pub async fn create_named_task(
    pool: &PgPool,
    namespace_uuid: Uuid,
    name: &str,
) -> Result<NamedTask, sqlx::Error> {
    NamedTask::create(
        pool,
        NewNamedTask {
            task_namespace_uuid: namespace_uuid,
            name: name.to_string(),
            version: None,
            description: None,
        },
    )
    .await
}

/// A task with a fresh template and no steps.
pub async fn create_task_bare(pool: &PgPool) -> Result<Task, sqlx::Error> {
    let namespace = create_namespace(pool, FACTORY_NAMESPACE).await?;
    let named_task = create_named_task(
        pool,
        namespace.task_namespace_uuid,
        &format!("workflow_{}", Uuid::new_v4().simple()),
    )
    .await?;
    Task::create(
        pool,
        NewTask {
            named_task_uuid: named_task.named_task_uuid,
            ..NewTask::default()
        },
    )
    .await
}

/// A task plus named steps wired by `edges` (indices into `step_names`).
pub async fn create_task_with_steps(
    pool: &PgPool,
    step_names: &[&str],
    edges: &[(usize, usize)],
) -> Result<(Task, Vec<WorkflowStep>), sqlx::Error> {
    let task = create_task_bare(pool).await?;

    let mut steps = Vec::with_capacity(step_names.len());
    for name in step_names {
        let step = WorkflowStep::create(pool, NewWorkflowStep::named(task.task_uuid, *name)).await?;
        WorkflowStepTransition::create(
            pool,
            NewWorkflowStepTransition {
                workflow_step_uuid: step.workflow_step_uuid,
                to_state: "pending".to_string(),
                from_state: None,
                metadata: None,
            },
        )
        .await?;
        steps.push(step);
    }

    for (from, to) in edges {
        WorkflowStepEdge::create(
            pool,
            steps[*from].workflow_step_uuid,
            steps[*to].workflow_step_uuid,
        )
        .await?;
    }

    Ok((task, steps))
}

/// `step_1 -> step_2 -> … -> step_n`.
pub async fn create_linear_task(
    pool: &PgPool,
    count: usize,
) -> Result<(Task, Vec<WorkflowStep>), sqlx::Error> {
    let names: Vec<String> = (1..=count).map(|i| format!("step_{i}")).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let edges: Vec<(usize, usize)> = (1..count).map(|i| (i - 1, i)).collect();
    create_task_with_steps(pool, &name_refs, &edges).await
}

/// `fetch_data -> {branch_left, branch_right} -> merge_results`.
pub async fn create_diamond_task(pool: &PgPool) -> Result<(Task, Vec<WorkflowStep>), sqlx::Error> {
    create_task_with_steps(
        pool,
        &["fetch_data", "branch_left", "branch_right", "merge_results"],
        &[(0, 1), (0, 2), (1, 3), (2, 3)],
    )
    .await
}

/// Adjust a step's retry budget after creation.
pub async fn update_retry_limit(
    pool: &PgPool,
    workflow_step_uuid: Uuid,
    retry_limit: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE stepline.workflow_steps SET retry_limit = $2 WHERE workflow_step_uuid = $1",
    )
    .bind(workflow_step_uuid)
    .bind(retry_limit)
    .execute(pool)
    .await?;
    Ok(())
}
