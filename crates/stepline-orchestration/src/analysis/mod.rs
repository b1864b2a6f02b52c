//! # Dependency Analysis
//!
//! Bottleneck scoring and completion estimates over a task's graph, served
//! through a TTL cache that adapts to store pressure. Read-only; nothing
//! here mutates workflow state.

use std::sync::Arc;

use uuid::Uuid;

use stepline_shared::errors::EngineResult;
use stepline_shared::SystemContext;

use crate::coordinator::sequence::StepSequence;

pub mod bottleneck;
pub mod cache;

pub use bottleneck::{AnalysisReport, BottleneckAnalyzer, Severity, StepScore};
pub use cache::AnalysisCache;

#[derive(Debug)]
pub struct DependencyAnalyzer {
    context: Arc<SystemContext>,
    analyzer: BottleneckAnalyzer,
    cache: AnalysisCache,
}

impl DependencyAnalyzer {
    pub fn new(context: Arc<SystemContext>) -> Self {
        let analyzer = BottleneckAnalyzer::new(context.config().dependency_analysis.clone());
        let cache = AnalysisCache::new(context.config().analysis_cache.clone());
        Self {
            context,
            analyzer,
            cache,
        }
    }

    /// Cached report for a task; computes and caches on miss.
    pub async fn report_for(&self, task_uuid: Uuid) -> EngineResult<Arc<AnalysisReport>> {
        if let Some(report) = self.cache.get(task_uuid).await {
            return Ok(report);
        }

        let sequence = StepSequence::load(&self.context, task_uuid).await?;
        let levels = self
            .context
            .sql_functions()
            .get_dependency_levels(task_uuid)
            .await?;
        let report = Arc::new(self.analyzer.analyze(&sequence, &levels));

        let ttl = match self.context.sql_functions().get_system_health().await {
            Ok(health) => self.cache.adaptive_ttl(&health),
            Err(_) => self.cache.default_ttl(),
        };
        self.cache.insert(task_uuid, report.clone(), ttl).await;
        Ok(report)
    }

    /// Drop a task's cached report, e.g. after a coordinator pass.
    pub async fn invalidate(&self, task_uuid: Uuid) {
        self.cache.invalidate(task_uuid).await;
    }
}
