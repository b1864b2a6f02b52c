//! Shared system context: database pool, configuration, and event
//! publisher, bundled once and passed by `Arc` into every service.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{ConfigManager, EngineConfig};
use crate::database::{self, SqlFunctionExecutor};
use crate::errors::EngineResult;
use crate::events::{EventPublisher, TracingEventAdapter};

#[derive(Debug, Clone)]
pub struct SystemContext {
    pool: PgPool,
    config: Arc<EngineConfig>,
    events: Arc<EventPublisher>,
}

impl SystemContext {
    /// Load configuration from the environment and connect.
    pub async fn new() -> EngineResult<Self> {
        let config = ConfigManager::load()?;
        let pool = database::connect(&config.database).await?;
        Ok(Self::from_parts(pool, config, default_publisher()))
    }

    /// Wrap an existing pool with default configuration. Test suites use
    /// this with the pool `sqlx::test` provisions.
    pub async fn with_pool(pool: PgPool) -> EngineResult<Self> {
        Ok(Self::from_parts(
            pool,
            EngineConfig::default(),
            default_publisher(),
        ))
    }

    pub fn from_parts(pool: PgPool, config: EngineConfig, events: EventPublisher) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            events: Arc::new(events),
        }
    }

    pub fn database_pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        &self.events
    }

    pub fn sql_functions(&self) -> SqlFunctionExecutor {
        SqlFunctionExecutor::new(self.pool.clone())
    }
}

fn default_publisher() -> EventPublisher {
    EventPublisher::with_adapters(vec![Arc::new(TracingEventAdapter)])
}
