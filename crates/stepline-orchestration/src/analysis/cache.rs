//! Analysis report cache with adaptive per-entry TTL.
//!
//! Reports are cheap to serve and moderately expensive to compute, so the
//! TTL stretches as the store comes under pressure: an idle system
//! recomputes eagerly, a saturated one leans on cached reports.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;
use uuid::Uuid;

use stepline_shared::config::AnalysisCacheConfig;
use stepline_shared::models::SystemHealth;

use super::bottleneck::AnalysisReport;

#[derive(Clone)]
struct CachedReport {
    report: Arc<AnalysisReport>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<Uuid, CachedReport> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &Uuid,
        value: &CachedReport,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct AnalysisCache {
    cache: Cache<Uuid, CachedReport>,
    config: AnalysisCacheConfig,
}

impl AnalysisCache {
    pub fn new(config: AnalysisCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache, config }
    }

    pub async fn get(&self, task_uuid: Uuid) -> Option<Arc<AnalysisReport>> {
        self.cache.get(&task_uuid).await.map(|entry| entry.report)
    }

    pub async fn insert(&self, task_uuid: Uuid, report: Arc<AnalysisReport>, ttl: Duration) {
        self.cache
            .insert(task_uuid, CachedReport { report, ttl })
            .await;
    }

    pub async fn invalidate(&self, task_uuid: Uuid) {
        self.cache.invalidate(&task_uuid).await;
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.config.default_ttl)
    }

    /// TTL as a function of connection pressure: `min_adaptive_ttl` when
    /// idle, the default at the pressure threshold, `max_adaptive_ttl` at
    /// saturation. Piecewise linear and monotone.
    pub fn adaptive_ttl(&self, health: &SystemHealth) -> Duration {
        let pressure = health.connection_pressure();
        let threshold = self.config.cache_pressure_threshold.clamp(0.01, 0.99);
        let min = self.config.min_adaptive_ttl as f64;
        let default = self.config.default_ttl as f64;
        let max = self.config.max_adaptive_ttl as f64;

        let seconds = if pressure < threshold {
            min + (default - min) * (pressure / threshold)
        } else {
            default + (max - default) * ((pressure - threshold) / (1.0 - threshold))
        };
        Duration::from_secs_f64(seconds.clamp(min, max))
    }
}

impl fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("entries", &self.cache.entry_count())
            .field("config", &self.config)
            .finish()
    }
}
