//! Retry backoff configuration.
//!
//! The progression covers the first attempts directly; later attempts fall
//! back to `attempt ^ multiplier` capped at `max_backoff_seconds`. Jitter
//! spreads retries of sibling steps so they do not stampede the store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay in seconds per attempt number, 1-indexed.
    pub default_backoff_seconds: Vec<u32>,
    /// Ceiling for the exponential fallback, seconds.
    pub max_backoff_seconds: u32,
    /// Exponent for attempts beyond the progression.
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter as a fraction of the base delay.
    pub jitter_max_percentage: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_backoff_seconds: vec![1, 2, 4, 8, 16, 32],
            max_backoff_seconds: 300,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            jitter_max_percentage: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_progression() {
        let config = BackoffConfig::default();
        assert_eq!(config.default_backoff_seconds, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(config.max_backoff_seconds, 300);
        assert!(config.jitter_enabled);
    }
}
