//! Named tasks are workflow templates. The full name
//! `namespace.name@version` is the handler discovery key.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub const DEFAULT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NamedTask {
    pub named_task_uuid: Uuid,
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewNamedTask {
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl NamedTask {
    pub async fn create(pool: &PgPool, new: NewNamedTask) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.named_tasks \
             (named_task_uuid, task_namespace_uuid, name, version, description) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.task_namespace_uuid)
        .bind(&new.name)
        .bind(new.version.as_deref().unwrap_or(DEFAULT_VERSION))
        .bind(&new.description)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, named_task_uuid: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM stepline.named_tasks WHERE named_task_uuid = $1")
            .bind(named_task_uuid)
            .fetch_optional(pool)
            .await
    }

    /// `namespace.name@version`.
    pub async fn full_name(&self, pool: &PgPool) -> Result<String, sqlx::Error> {
        let namespace: String = sqlx::query_scalar(
            "SELECT name FROM stepline.task_namespaces WHERE task_namespace_uuid = $1",
        )
        .bind(self.task_namespace_uuid)
        .fetch_one(pool)
        .await?;
        Ok(format!("{}.{}@{}", namespace, self.name, self.version))
    }
}
