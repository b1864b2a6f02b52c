//! Task namespaces group named tasks, tenant-style.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskNamespace {
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TaskNamespace {
    pub async fn find_or_create(pool: &PgPool, name: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO stepline.task_namespaces (task_namespace_uuid, name) \
             VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM stepline.task_namespaces WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}
