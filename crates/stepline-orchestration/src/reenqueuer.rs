//! Task reenqueue strategy and the job-queue boundary.
//!
//! The coordinator never waits in-process for a retry window. When a task
//! cannot complete yet it transitions back to pending and is handed here;
//! the queue re-invokes `handle(task)` immediately or after a delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use stepline_shared::errors::{EngineError, EngineResult};
use stepline_shared::models::Task;
use stepline_shared::SystemContext;

/// Outer driver boundary. Production deployments back this with a durable
/// queue; a single-process deployment can use [`InProcessJobQueue`].
#[async_trait]
pub trait JobQueue: Send + Sync + std::fmt::Debug {
    async fn enqueue(&self, task_uuid: Uuid) -> EngineResult<()>;

    async fn enqueue_after(&self, task_uuid: Uuid, delay: Duration) -> EngineResult<()>;
}

/// Tokio-channel queue for single-process deployments and demos. Delayed
/// enqueues ride a detached sleep; durability is explicitly not offered.
#[derive(Debug, Clone)]
pub struct InProcessJobQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl InProcessJobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn enqueue(&self, task_uuid: Uuid) -> EngineResult<()> {
        self.tx
            .send(task_uuid)
            .map_err(|_| EngineError::Queue("queue receiver dropped".to_string()))
    }

    async fn enqueue_after(&self, task_uuid: Uuid, delay: Duration) -> EngineResult<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver may be gone at fire time; nothing to recover then.
            let _ = tx.send(task_uuid);
        });
        Ok(())
    }
}

/// Strategy object the coordinator calls when a task should run again
/// later.
#[derive(Debug, Clone)]
pub struct TaskReenqueuer {
    context: Arc<SystemContext>,
    queue: Arc<dyn JobQueue>,
}

impl TaskReenqueuer {
    pub fn new(context: Arc<SystemContext>, queue: Arc<dyn JobQueue>) -> Self {
        Self { context, queue }
    }

    /// Immediate handoff: the queue re-invokes the coordinator as soon as
    /// it can.
    pub async fn reenqueue(&self, task: &Task, reason: &str) -> EngineResult<()> {
        debug!(
            correlation_id = %task.correlation_id,
            task_uuid = %task.task_uuid,
            reason = reason,
            "Reenqueueing task"
        );
        self.context
            .event_publisher()
            .publish_task_reenqueued(task, None, reason)
            .await;
        self.queue.enqueue(task.task_uuid).await
    }

    /// Delayed handoff, typically `earliest next_retry_at - now`.
    pub async fn reenqueue_delayed(
        &self,
        task: &Task,
        delay: Duration,
        reason: &str,
    ) -> EngineResult<()> {
        debug!(
            correlation_id = %task.correlation_id,
            task_uuid = %task.task_uuid,
            delay_seconds = delay.as_secs(),
            reason = reason,
            "Reenqueueing task with delay"
        );
        self.context
            .event_publisher()
            .publish_task_reenqueued(task, Some(delay.as_secs()), reason)
            .await;
        self.queue.enqueue_after(task.task_uuid, delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_queue_delivers_immediately() {
        let (queue, mut rx) = InProcessJobQueue::new();
        let task_uuid = Uuid::now_v7();
        queue.enqueue(task_uuid).await.unwrap();
        assert_eq!(rx.recv().await, Some(task_uuid));
    }

    #[tokio::test]
    async fn delayed_enqueue_waits_out_the_delay() {
        let (queue, mut rx) = InProcessJobQueue::new();
        let task_uuid = Uuid::now_v7();
        queue
            .enqueue_after(task_uuid, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err(), "must not deliver before the delay");
        assert_eq!(rx.recv().await, Some(task_uuid));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_a_queue_error() {
        let (queue, rx) = InProcessJobQueue::new();
        drop(rx);
        let err = queue.enqueue(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::Queue(_)));
    }
}
