//! Database access: pool construction, embedded migrations, and typed
//! wrappers for the readiness SQL functions.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::errors::EngineResult;

pub mod sql_functions;

pub use sql_functions::SqlFunctionExecutor;

/// Embedded migrations; tests run them with
/// `#[sqlx::test(migrator = "stepline_shared::database::MIGRATOR")]`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Build a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> EngineResult<PgPool> {
    let url = config.resolve_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.checkout_timeout_seconds))
        .connect(&url)
        .await?;
    Ok(pool)
}
