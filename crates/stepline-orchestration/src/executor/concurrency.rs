//! Dynamic concurrency sizing.
//!
//! Recomputed from system health at most once per cache window. The pure
//! calculation is separated from the cached accessor so the sizing rules
//! are testable without a database.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use stepline_shared::config::ExecutionConfig;
use stepline_shared::models::SystemHealth;
use stepline_shared::SystemContext;

/// Connections held back from the executor so transitions and readiness
/// queries always have headroom.
const CONNECTION_SAFETY_MARGIN: i64 = 2;

#[derive(Debug, Clone, Copy)]
struct CachedValue {
    computed_at: Instant,
    max_concurrent: usize,
}

/// Computes and caches the executor's max concurrency.
#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    context: Arc<SystemContext>,
    cached: Arc<Mutex<Option<CachedValue>>>,
}

impl ConcurrencyGovernor {
    pub fn new(context: Arc<SystemContext>) -> Self {
        Self {
            context,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Current max concurrency. Values are served from cache for the
    /// configured window; any calculation error falls back to the floor.
    pub async fn max_concurrent(&self) -> usize {
        let config = &self.context.config().execution;
        let mut cached = self.cached.lock().await;

        if let Some(value) = *cached {
            if value.computed_at.elapsed() < config.concurrency_cache_duration() {
                return value.max_concurrent;
            }
        }

        let max_concurrent = match self.context.sql_functions().get_system_health().await {
            Ok(health) => Self::calculate(&health, config),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = config.min_concurrent_steps,
                    "System health unavailable; falling back to minimum concurrency"
                );
                config.min_concurrent_steps
            }
        };

        *cached = Some(CachedValue {
            computed_at: Instant::now(),
            max_concurrent,
        });
        debug!(max_concurrent, "Concurrency recomputed");
        max_concurrent
    }

    /// Pure sizing rule: base by load, capped by connection headroom,
    /// clamped to the configured floor and ceiling.
    pub fn calculate(health: &SystemHealth, config: &ExecutionConfig) -> usize {
        let step_load = health.step_load();
        let task_load = health.task_load();

        let base: usize = if step_load < 50 && task_load < 10 {
            12
        } else if step_load < 200 && task_load < 50 {
            8
        } else if step_load < 500 && task_load < 100 {
            6
        } else if step_load < 1000 {
            5
        } else {
            4
        };

        let headroom = (health.available_connections() - CONNECTION_SAFETY_MARGIN).max(0) as usize;

        base.min(headroom)
            .clamp(config.min_concurrent_steps, config.max_concurrent_steps_limit)
    }
}
