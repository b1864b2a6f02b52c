//! # Engine Configuration
//!
//! Configuration types for the workflow engine. Each concern keeps its own
//! struct so environment overlays can target a single table:
//!
//! ```text
//! config/
//! ├── mod.rs        # EngineConfig
//! ├── execution.rs  # ExecutionConfig (concurrency, batch timeouts, cleanup)
//! ├── backoff.rs    # BackoffConfig (retry delay progression, jitter)
//! ├── analysis.rs   # DependencyAnalysisConfig + AnalysisCacheConfig
//! ├── database.rs   # DatabaseConfig
//! └── loader.rs     # ConfigManager (TOML base + overlay + env vars)
//! ```
//!
//! Configuration is a value passed into constructors; there is no process
//! global. Environment-specific overrides compose through the loader.

use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod backoff;
pub mod database;
pub mod execution;
pub mod loader;

pub use analysis::{
    AnalysisCacheConfig, DependencyAnalysisConfig, DurationEstimates, ScoringWeights,
    SeverityMultipliers, SeverityThresholds,
};
pub use backoff::BackoffConfig;
pub use database::DatabaseConfig;
pub use execution::ExecutionConfig;
pub use loader::ConfigManager;

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub backoff: BackoffConfig,
    pub dependency_analysis: DependencyAnalysisConfig,
    pub analysis_cache: AnalysisCacheConfig,
    pub database: DatabaseConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.execution.min_concurrent_steps, 3);
        assert_eq!(config.execution.max_concurrent_steps_limit, 12);
        assert_eq!(config.backoff.default_backoff_seconds, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(config.analysis_cache.default_ttl, 300);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let rendered = toml::to_string(&config).expect("serialize");
        let parsed: EngineConfig = toml::from_str(&rendered).expect("deserialize");
        assert_eq!(
            parsed.execution.batch_timeout_base_seconds,
            config.execution.batch_timeout_base_seconds
        );
        assert_eq!(parsed.backoff.jitter_max_percentage, config.backoff.jitter_max_percentage);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_with_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            [execution]
            max_concurrent_steps_limit = 6

            [backoff]
            jitter_enabled = false
            "#,
        )
        .expect("deserialize");

        assert_eq!(parsed.execution.max_concurrent_steps_limit, 6);
        assert_eq!(parsed.execution.min_concurrent_steps, 3);
        assert!(!parsed.backoff.jitter_enabled);
        assert_eq!(parsed.backoff.max_backoff_seconds, 300);
    }
}
