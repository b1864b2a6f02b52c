//! Dependency-analysis scoring and cache configuration.

use serde::{Deserialize, Serialize};

/// Bottleneck scoring configuration for the dependency analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyAnalysisConfig {
    pub weights: ScoringWeights,
    pub severity: SeverityMultipliers,
    pub thresholds: SeverityThresholds,
    pub durations: DurationEstimates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub downstream: f64,
    pub blocked: f64,
    pub path_length: f64,
    pub completed_penalty: f64,
    pub blocked_penalty: f64,
    pub error_penalty: f64,
    pub retry_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            downstream: 2.0,
            blocked: 5.0,
            path_length: 1.0,
            completed_penalty: 10.0,
            blocked_penalty: 25.0,
            error_penalty: 50.0,
            retry_penalty: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityMultipliers {
    pub error_state: f64,
    pub exhausted_retry_bonus: f64,
    pub dependency_issue: f64,
}

impl Default for SeverityMultipliers {
    fn default() -> Self {
        Self {
            error_state: 2.0,
            exhausted_retry_bonus: 0.5,
            dependency_issue: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            critical: 100.0,
            high: 50.0,
            medium: 20.0,
        }
    }
}

/// Inputs for estimated-completion math, all in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationEstimates {
    pub base_step_seconds: u64,
    pub error_penalty_seconds: u64,
    pub retry_penalty_seconds: u64,
}

impl Default for DurationEstimates {
    fn default() -> Self {
        Self {
            base_step_seconds: 30,
            error_penalty_seconds: 60,
            retry_penalty_seconds: 30,
        }
    }
}

/// Analysis report cache configuration. TTL values are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisCacheConfig {
    pub default_ttl: u64,
    pub min_adaptive_ttl: u64,
    pub max_adaptive_ttl: u64,
    /// Connection-pressure ratio above which TTLs stretch toward the max.
    pub cache_pressure_threshold: f64,
    pub adaptive_calculation_interval: u64,
}

impl Default for AnalysisCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: 300,
            min_adaptive_ttl: 30,
            max_adaptive_ttl: 3600,
            cache_pressure_threshold: 0.8,
            adaptive_calculation_interval: 30,
        }
    }
}
