//! End-to-end coordinator scenarios against a live store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    build_context, config_with_backoff, FailTimesHandler, OkHandler, RecordingQueue, SleepHandler,
};
use stepline_orchestration::coordinator::{CoordinationAction, WorkflowCoordinator};
use stepline_orchestration::handler::HandlerRegistry;
use stepline_orchestration::reenqueuer::TaskReenqueuer;
use stepline_shared::config::EngineConfig;
use stepline_shared::models::{Task, WorkflowStep, WorkflowStepTransition};
use stepline_shared::testing::factory;

async fn coordinator_for(
    context: Arc<stepline_shared::SystemContext>,
    registry: HandlerRegistry,
    queue: RecordingQueue,
) -> WorkflowCoordinator {
    let reenqueuer = TaskReenqueuer::new(context.clone(), Arc::new(queue));
    WorkflowCoordinator::new(context, Arc::new(registry), reenqueuer)
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn happy_linear_path_completes_step_by_step(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (context, events) = build_context(pool.clone(), EngineConfig::default());
    let (task, steps) = factory::create_linear_task(&pool, 6).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    for step in &steps {
        registry.register(&task_name, &step.named_step, Arc::new(OkHandler));
    }
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context, registry, queue.clone()).await;

    let outcome = coordinator.handle(task.task_uuid).await?;

    assert_eq!(outcome.action, CoordinationAction::Completed);
    // A chain admits one viable step at a time: six passes, six batches.
    assert_eq!(outcome.passes, 6);
    assert_eq!(outcome.batches_executed, 6);
    assert_eq!(outcome.steps_processed, 6);

    for step in &steps {
        let row = WorkflowStep::find_by_id(&pool, step.workflow_step_uuid)
            .await?
            .expect("step row");
        assert_eq!(row.status, "complete");
        assert_eq!(row.attempts, 1);
        assert!(row.processed);

        let states: Vec<String> = WorkflowStepTransition::history(&pool, step.workflow_step_uuid)
            .await?
            .into_iter()
            .map(|t| t.to_state)
            .collect();
        assert_eq!(states, vec!["pending", "in_progress", "complete"]);
    }

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "complete");
    assert!(task_row.complete);
    assert!(queue.records().is_empty(), "a completed task is not reenqueued");
    assert_eq!(events.count_of("step.completed"), 6);
    assert_eq!(events.count_of("task.completed"), 1);
    Ok(())
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn single_retry_schedules_backoff_then_succeeds(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Progression [1, 2, 4, ...] with jitter off pins next_retry_at.
    let (context, events) = build_context(pool.clone(), config_with_backoff(vec![1, 2, 4]));
    let (task, steps) = factory::create_task_with_steps(&pool, &["process_data"], &[]).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(&task_name, "process_data", Arc::new(FailTimesHandler { failures: 1 }));
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context, registry, queue.clone()).await;

    let before = chrono::Utc::now().naive_utc();
    let outcome = coordinator.handle(task.task_uuid).await?;
    assert!(matches!(
        outcome.action,
        CoordinationAction::Reenqueued { delay_seconds: Some(_) }
    ));

    let step = WorkflowStep::find_by_id(&pool, steps[0].workflow_step_uuid)
        .await?
        .expect("step row");
    assert_eq!(step.status, "error");
    assert_eq!(step.attempts, 1);
    let next_retry_at = step.next_retry_at.expect("backoff scheduled");
    let scheduled_for = next_retry_at - before;
    assert!(
        scheduled_for >= chrono::Duration::milliseconds(900)
            && scheduled_for <= chrono::Duration::milliseconds(2500),
        "next_retry_at should land about one second out, got {scheduled_for}"
    );

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "pending");

    let records = queue.records();
    assert_eq!(records.len(), 1);
    let (queued_uuid, delay) = records[0];
    assert_eq!(queued_uuid, task.task_uuid);
    let delay = delay.expect("delayed reenqueue");
    assert!(delay <= Duration::from_secs(1), "delay capped by the 1s backoff");

    // Let the backoff elapse, then run the scheduled invocation.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let outcome = coordinator.handle(task.task_uuid).await?;
    assert_eq!(outcome.action, CoordinationAction::Completed);

    let step = WorkflowStep::find_by_id(&pool, steps[0].workflow_step_uuid)
        .await?
        .expect("step row");
    assert_eq!(step.status, "complete");
    assert_eq!(step.attempts, 2);
    assert_eq!(events.count_of("step.failed"), 1);
    assert_eq!(events.count_of("step.completed"), 1);
    Ok(())
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn retry_exhaustion_finalizes_the_task_to_error(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Zero backoff lets the retry loop run inside a single handle call.
    let (context, events) = build_context(pool.clone(), config_with_backoff(vec![0, 0, 0]));
    let (task, steps) = factory::create_task_with_steps(&pool, &["flaky_export"], &[]).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(&task_name, "flaky_export", Arc::new(FailTimesHandler { failures: 5 }));
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context.clone(), registry, queue.clone()).await;

    let outcome = coordinator.handle(task.task_uuid).await?;
    assert_eq!(outcome.action, CoordinationAction::Failed);
    assert_eq!(outcome.passes, 3, "retry_limit bounds the attempts");

    let step = WorkflowStep::find_by_id(&pool, steps[0].workflow_step_uuid)
        .await?
        .expect("step row");
    assert_eq!(step.status, "error");
    assert_eq!(step.attempts, 3);

    let readiness = context
        .sql_functions()
        .get_step_readiness_for(task.task_uuid, step.workflow_step_uuid)
        .await?
        .expect("readiness row");
    assert!(!readiness.retry_eligible);
    assert_eq!(readiness.retry_status, "max_retries_reached");

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "error");
    assert!(queue.records().is_empty(), "an exhausted task is not reenqueued");
    assert_eq!(events.count_of("step.max_retries_reached"), 1);

    let failed = events
        .captured()
        .into_iter()
        .find(|e| e.event_type == "task.failed")
        .expect("task.failed event");
    let summary = failed.payload["error_steps"].as_array().expect("summary array");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0]["named_step"], "flaky_export");
    assert_eq!(summary[0]["attempts"], 3);
    Ok(())
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn diamond_runs_branches_concurrently_and_recovers_convergence(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (context, _events) = build_context(pool.clone(), config_with_backoff(vec![0]));
    let (task, steps) = factory::create_diamond_task(&pool).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(&task_name, "fetch_data", Arc::new(OkHandler));
    registry.register(&task_name, "branch_left", Arc::new(OkHandler));
    registry.register(&task_name, "branch_right", Arc::new(OkHandler));
    registry.register(&task_name, "merge_results", Arc::new(FailTimesHandler { failures: 1 }));
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context, registry, queue.clone()).await;

    let outcome = coordinator.handle(task.task_uuid).await?;
    assert_eq!(outcome.action, CoordinationAction::Completed);

    // Root, both branches together, failed merge, retried merge.
    assert_eq!(outcome.passes, 4);
    assert_eq!(outcome.batches_executed, 4);
    assert_eq!(outcome.steps_processed, 5);

    let expected_attempts = [1, 1, 1, 2];
    for (step, expected) in steps.iter().zip(expected_attempts) {
        let row = WorkflowStep::find_by_id(&pool, step.workflow_step_uuid)
            .await?
            .expect("step row");
        assert_eq!(row.status, "complete", "{} should complete", row.named_step);
        assert_eq!(row.attempts, expected, "{} attempts", row.named_step);
    }

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "complete");
    Ok(())
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn batch_timeout_abandons_the_slow_step_and_reenqueues(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::default();
    config.execution.batch_timeout_base_seconds = 1;
    config.execution.batch_timeout_per_step_seconds = 0;
    config.execution.future_cleanup_wait_seconds = 1;
    let (context, _events) = build_context(pool.clone(), config);

    // Two independent roots share one batch.
    let (task, steps) =
        factory::create_task_with_steps(&pool, &["slow_sync", "fast_notify"], &[]).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(
        &task_name,
        "slow_sync",
        Arc::new(SleepHandler {
            duration: Duration::from_secs(30),
        }),
    );
    registry.register(&task_name, "fast_notify", Arc::new(OkHandler));
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context, registry, queue.clone()).await;

    let outcome = coordinator.handle(task.task_uuid).await?;

    // The fast step lands; the slow one is abandoned mid-flight.
    assert!(matches!(
        outcome.action,
        CoordinationAction::Reenqueued { delay_seconds: None }
    ));
    assert_eq!(outcome.steps_processed, 1);

    let slow = WorkflowStep::find_by_id(&pool, steps[0].workflow_step_uuid)
        .await?
        .expect("step row");
    assert_eq!(slow.status, "in_progress", "abandoned, not failed");
    assert_eq!(slow.attempts, 0, "the executor never marked the slow step");
    assert!(slow.results.is_none());

    let fast = WorkflowStep::find_by_id(&pool, steps[1].workflow_step_uuid)
        .await?
        .expect("step row");
    assert_eq!(fast.status, "complete");
    assert_eq!(fast.attempts, 1);

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "pending");
    assert_eq!(queue.records(), vec![(task.task_uuid, None)]);
    Ok(())
}

#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]
async fn reenqueue_then_handle_matches_a_direct_loop(
    pool: sqlx::PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Reenqueue idempotence: driving the task through queued invocations
    // reaches the same terminal state as one uninterrupted loop.
    let (context, _events) = build_context(pool.clone(), config_with_backoff(vec![1]));
    let (task, _steps) = factory::create_linear_task(&pool, 3).await?;
    let task_name = task.full_name(&pool).await?;

    let mut registry = HandlerRegistry::new();
    for name in ["step_1", "step_2", "step_3"] {
        registry.register(&task_name, name, Arc::new(FailTimesHandler { failures: 1 }));
    }
    let queue = RecordingQueue::new();
    let coordinator = coordinator_for(context, registry, queue.clone()).await;

    // Replay queued invocations the way the outer driver would, waiting
    // out each scheduled backoff.
    let mut invocations = 0;
    loop {
        invocations += 1;
        assert!(invocations <= 8, "must converge");
        let outcome = coordinator.handle(task.task_uuid).await?;
        match outcome.action {
            CoordinationAction::Completed => break,
            CoordinationAction::Failed => panic!("should not fail"),
            CoordinationAction::Reenqueued { .. } => {
                tokio::time::sleep(Duration::from_millis(1200)).await;
            }
        }
    }

    let task_row = Task::find_by_id(&pool, task.task_uuid).await?.expect("task row");
    assert_eq!(task_row.status, "complete");
    for step in WorkflowStep::for_task(&pool, task.task_uuid).await? {
        assert_eq!(step.status, "complete");
        assert_eq!(step.attempts, 2, "one failure plus one success each");
    }
    assert!(!queue.records().is_empty(), "the backoff path was exercised");
    Ok(())
}
