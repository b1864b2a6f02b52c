//! Process-wide health counters.

use serde::Serialize;
use sqlx::FromRow;

/// One row of `stepline.get_system_health`. Drives dynamic concurrency
/// sizing and the adaptive analysis-cache TTL.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct SystemHealth {
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub complete_tasks: i64,
    pub error_tasks: i64,
    pub cancelled_tasks: i64,
    pub pending_steps: i64,
    pub in_progress_steps: i64,
    pub complete_steps: i64,
    pub error_steps: i64,
    pub retry_eligible_steps: i64,
    pub exhausted_retry_steps: i64,
    pub in_backoff_steps: i64,
    pub active_connections: i64,
    pub max_connections: i64,
}

impl SystemHealth {
    pub fn available_connections(&self) -> i64 {
        (self.max_connections - self.active_connections).max(0)
    }

    /// Fraction of the connection budget currently in use, in `[0, 1]`.
    pub fn connection_pressure(&self) -> f64 {
        if self.max_connections <= 0 {
            return 1.0;
        }
        (self.active_connections as f64 / self.max_connections as f64).clamp(0.0, 1.0)
    }

    pub fn step_load(&self) -> i64 {
        self.pending_steps + self.in_progress_steps
    }

    pub fn task_load(&self) -> i64 {
        self.pending_tasks + self.in_progress_tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_pressure_is_a_ratio() {
        let health = SystemHealth {
            active_connections: 19,
            max_connections: 20,
            ..SystemHealth::default()
        };
        assert_eq!(health.available_connections(), 1);
        assert!((health.connection_pressure() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn pressure_saturates_when_max_is_unknown() {
        let health = SystemHealth {
            active_connections: 5,
            max_connections: 0,
            ..SystemHealth::default()
        };
        assert_eq!(health.connection_pressure(), 1.0);
        assert_eq!(health.available_connections(), 0);
    }
}
