//! Step execution configuration: dynamic concurrency bounds, batch
//! timeouts, worker cleanup, and the memory-maintenance trigger.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Concurrency floor; also the fallback when the health calculation fails.
    pub min_concurrent_steps: usize,
    /// Concurrency ceiling regardless of load score.
    pub max_concurrent_steps_limit: usize,
    /// Seconds a computed max-concurrency value may be served from cache.
    pub concurrency_cache_duration: u64,
    /// Base seconds of the per-batch collection timeout.
    pub batch_timeout_base_seconds: u64,
    /// Additional seconds of batch timeout per step in the batch.
    pub batch_timeout_per_step_seconds: u64,
    /// Hard ceiling for the per-batch collection timeout, seconds.
    pub max_batch_timeout_seconds: u64,
    /// Seconds to wait for an executing worker during cleanup before
    /// abandoning it.
    pub future_cleanup_wait_seconds: u64,
    /// Batch size at or above which a memory reclamation pass is requested.
    pub gc_trigger_batch_size_threshold: usize,
    /// Batch duration (seconds) at or above which a reclamation pass is
    /// requested.
    pub gc_trigger_duration_threshold: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_concurrent_steps: 3,
            max_concurrent_steps_limit: 12,
            concurrency_cache_duration: 30,
            batch_timeout_base_seconds: 30,
            batch_timeout_per_step_seconds: 5,
            max_batch_timeout_seconds: 120,
            future_cleanup_wait_seconds: 1,
            gc_trigger_batch_size_threshold: 6,
            gc_trigger_duration_threshold: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn concurrency_cache_duration(&self) -> Duration {
        Duration::from_secs(self.concurrency_cache_duration)
    }

    /// `min(max_batch_timeout, base + per_step * batch_size)`.
    pub fn batch_timeout_for(&self, batch_size: usize) -> Duration {
        let scaled = self
            .batch_timeout_base_seconds
            .saturating_add(self.batch_timeout_per_step_seconds.saturating_mul(batch_size as u64));
        Duration::from_secs(scaled.min(self.max_batch_timeout_seconds))
    }

    pub fn future_cleanup_wait(&self) -> Duration {
        Duration::from_secs(self.future_cleanup_wait_seconds)
    }

    pub fn gc_trigger_duration(&self) -> Duration {
        Duration::from_secs(self.gc_trigger_duration_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_timeout_scales_with_batch_size() {
        let config = ExecutionConfig::default();
        assert_eq!(config.batch_timeout_for(1), Duration::from_secs(35));
        assert_eq!(config.batch_timeout_for(6), Duration::from_secs(60));
    }

    #[test]
    fn batch_timeout_is_capped() {
        let config = ExecutionConfig::default();
        // 30 + 5 * 50 = 280, capped at 120
        assert_eq!(config.batch_timeout_for(50), Duration::from_secs(120));
    }
}
