//! Runtime task instances.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::correlation::new_correlation_id;
use crate::state_machine::states::TaskState;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub complete: bool,
    pub status: String,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub tags: Option<Value>,
    pub bypass_steps: Option<Value>,
    pub context: Option<Value>,
    pub correlation_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub named_task_uuid: Uuid,
    pub context: Option<Value>,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub tags: Option<Value>,
    pub bypass_steps: Option<Value>,
    /// Generated when absent.
    pub correlation_id: Option<String>,
}

impl Task {
    pub async fn create(pool: &PgPool, new: NewTask) -> Result<Self, sqlx::Error> {
        let correlation_id = new.correlation_id.unwrap_or_else(new_correlation_id);
        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.tasks \
             (task_uuid, named_task_uuid, context, initiator, source_system, reason, \
              tags, bypass_steps, correlation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.named_task_uuid)
        .bind(&new.context)
        .bind(&new.initiator)
        .bind(&new.source_system)
        .bind(&new.reason)
        .bind(&new.tags)
        .bind(&new.bypass_steps)
        .bind(&correlation_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, task_uuid: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM stepline.tasks WHERE task_uuid = $1")
            .bind(task_uuid)
            .fetch_optional(pool)
            .await
    }

    /// `namespace.name@version` of the backing template.
    pub async fn full_name(&self, pool: &PgPool) -> Result<String, sqlx::Error> {
        let (namespace, name, version): (String, String, String) = sqlx::query_as(
            "SELECT ns.name, nt.name, nt.version \
             FROM stepline.named_tasks nt \
             JOIN stepline.task_namespaces ns ON ns.task_namespace_uuid = nt.task_namespace_uuid \
             WHERE nt.named_task_uuid = $1",
        )
        .bind(self.named_task_uuid)
        .fetch_one(pool)
        .await?;
        Ok(format!("{namespace}.{name}@{version}"))
    }

    /// Derived status as a typed state; the column always carries a label
    /// from the closed set.
    pub fn state(&self) -> TaskState {
        self.status.parse().unwrap_or(TaskState::Pending)
    }

    /// Step names gated as terminal-success without execution.
    pub fn bypass_step_names(&self) -> Vec<String> {
        self.bypass_steps
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_step_names_tolerates_absent_and_malformed_values() {
        let mut task = Task {
            task_uuid: Uuid::nil(),
            named_task_uuid: Uuid::nil(),
            complete: false,
            status: "pending".to_string(),
            requested_at: chrono::Utc::now().naive_utc(),
            initiator: None,
            source_system: None,
            reason: None,
            tags: None,
            bypass_steps: None,
            context: None,
            correlation_id: "tsk_0_00000000".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        assert!(task.bypass_step_names().is_empty());

        task.bypass_steps = Some(serde_json::json!(["fetch_inventory", 42, "notify"]));
        assert_eq!(task.bypass_step_names(), vec!["fetch_inventory", "notify"]);
    }
}
