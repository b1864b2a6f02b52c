//! Append-only task transition history.
//!
//! `append` flips the previous `most_recent` flag and inserts the next
//! transition with a strictly increasing `sort_key`; the partial unique
//! index keeps concurrent writers honest.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_transition_uuid: Uuid,
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub sort_key: i32,
    pub most_recent: bool,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewTaskTransition {
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<Value>,
}

impl TaskTransition {
    /// The current transition, if any.
    pub async fn most_recent<'e, E>(executor: E, task_uuid: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.task_transitions \
             WHERE task_uuid = $1 AND most_recent",
        )
        .bind(task_uuid)
        .fetch_optional(executor)
        .await
    }

    /// Append a transition inside an open transaction.
    pub async fn append(
        conn: &mut PgConnection,
        new: NewTaskTransition,
    ) -> Result<Self, sqlx::Error> {
        let next_sort_key: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_key), 0) + 1 \
             FROM stepline.task_transitions WHERE task_uuid = $1",
        )
        .bind(new.task_uuid)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE stepline.task_transitions \
             SET most_recent = FALSE \
             WHERE task_uuid = $1 AND most_recent",
        )
        .bind(new.task_uuid)
        .execute(&mut *conn)
        .await?;

        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.task_transitions \
             (task_transition_uuid, task_uuid, to_state, from_state, sort_key, most_recent, metadata) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.task_uuid)
        .bind(&new.to_state)
        .bind(&new.from_state)
        .bind(next_sort_key)
        .bind(&new.metadata)
        .fetch_one(&mut *conn)
        .await
    }

    /// Append a transition in its own transaction. Test factories and
    /// operator tooling use this; the state machines always append inside
    /// their own transaction.
    pub async fn create(pool: &PgPool, new: NewTaskTransition) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let row = Self::append(&mut tx, new).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Full history, oldest first.
    pub async fn history(pool: &PgPool, task_uuid: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stepline.task_transitions \
             WHERE task_uuid = $1 ORDER BY sort_key",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::factory;

    fn transition(task_uuid: Uuid, to_state: &str, from_state: Option<&str>) -> NewTaskTransition {
        NewTaskTransition {
            task_uuid,
            to_state: to_state.to_string(),
            from_state: from_state.map(str::to_string),
            metadata: None,
        }
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn history_keeps_one_current_row_and_monotone_sort_keys(
        pool: sqlx::PgPool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let task = factory::create_task_bare(&pool).await?;
        let task_uuid = task.task_uuid;

        TaskTransition::create(&pool, transition(task_uuid, "pending", None)).await?;
        TaskTransition::create(&pool, transition(task_uuid, "in_progress", Some("pending"))).await?;
        TaskTransition::create(&pool, transition(task_uuid, "pending", Some("in_progress"))).await?;
        TaskTransition::create(&pool, transition(task_uuid, "in_progress", Some("pending"))).await?;

        let history = TaskTransition::history(&pool, task_uuid).await?;
        assert_eq!(history.len(), 4);

        let current: Vec<&TaskTransition> =
            history.iter().filter(|t| t.most_recent).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].to_state, "in_progress");

        for pair in history.windows(2) {
            assert!(pair[0].sort_key < pair[1].sort_key);
        }

        let fetched = TaskTransition::most_recent(&pool, task_uuid).await?.unwrap();
        assert_eq!(fetched.sort_key, history.last().unwrap().sort_key);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn histories_are_isolated_per_task(
        pool: sqlx::PgPool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let first = factory::create_task_bare(&pool).await?;
        let second = factory::create_task_bare(&pool).await?;

        TaskTransition::create(&pool, transition(first.task_uuid, "pending", None)).await?;
        TaskTransition::create(&pool, transition(second.task_uuid, "pending", None)).await?;
        TaskTransition::create(
            &pool,
            transition(first.task_uuid, "in_progress", Some("pending")),
        )
        .await?;

        assert_eq!(TaskTransition::history(&pool, first.task_uuid).await?.len(), 2);
        let second_history = TaskTransition::history(&pool, second.task_uuid).await?;
        assert_eq!(second_history.len(), 1);
        assert!(second_history[0].most_recent);
        Ok(())
    }
}
