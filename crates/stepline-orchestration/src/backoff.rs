//! Retry backoff policy.
//!
//! A pure function over `(attempt, config)`; the only nondeterminism is
//! the injected RNG, so tests pin a seed and production uses a fresh one.

use std::time::Duration;

use chrono::NaiveDateTime;

use stepline_shared::config::BackoffConfig;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the next try after `attempt` failures (1-indexed).
    /// `attempt <= 0` yields zero for policy calls outside the normal flow.
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        self.delay_with_rng(attempt, &mut fastrand::Rng::new())
    }

    /// Deterministic variant with an injected RNG.
    pub fn delay_with_rng(&self, attempt: i32, rng: &mut fastrand::Rng) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }

        let max = f64::from(self.config.max_backoff_seconds);
        let base = self
            .config
            .default_backoff_seconds
            .get(attempt as usize - 1)
            .copied()
            .map(f64::from)
            .unwrap_or_else(|| f64::from(attempt).powf(self.config.backoff_multiplier))
            .min(max);

        if !self.config.jitter_enabled {
            return Duration::from_secs_f64(base);
        }

        // Uniform in [-jitter_max, +jitter_max] of the base, floored at one
        // second so a retry never fires immediately.
        let span = base * self.config.jitter_max_percentage;
        let offset = (rng.f64() * 2.0 - 1.0) * span;
        Duration::from_secs_f64((base + offset).max(1.0))
    }

    /// Wall-clock `next_retry_at` for a step that just failed its
    /// `attempt`-th try.
    pub fn next_retry_at(&self, attempt: i32, now: NaiveDateTime) -> NaiveDateTime {
        let delay = self.delay_for_attempt(attempt);
        now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            jitter_enabled: jitter,
            ..BackoffConfig::default()
        })
    }

    #[test]
    fn progression_covers_the_first_six_attempts() {
        let policy = policy(false);
        let expected = [1, 2, 4, 8, 16, 32];
        for (i, seconds) in expected.iter().enumerate() {
            assert_eq!(
                policy.delay_for_attempt(i as i32 + 1),
                Duration::from_secs(*seconds),
                "attempt {}",
                i + 1
            );
        }
    }

    #[test]
    fn attempts_beyond_the_progression_square_and_cap() {
        let policy = policy(false);
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(49));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(100));
        // 20^2 = 400, capped at 300
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(300));
    }

    #[test]
    fn non_positive_attempts_yield_zero() {
        let policy = policy(true);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(-3), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_the_band_and_above_one_second() {
        let policy = policy(true);
        let mut rng = fastrand::Rng::with_seed(42);
        for attempt in 1..=12 {
            let base = BackoffPolicy::new(BackoffConfig {
                jitter_enabled: false,
                ..BackoffConfig::default()
            })
            .delay_for_attempt(attempt)
            .as_secs_f64();
            for _ in 0..64 {
                let jittered = policy.delay_with_rng(attempt, &mut rng).as_secs_f64();
                assert!(jittered >= 1.0, "attempt {attempt}: {jittered} < 1s floor");
                assert!(
                    (jittered - base).abs() <= base * 0.1 + 1e-9 || jittered == 1.0,
                    "attempt {attempt}: {jittered} outside ±10% of {base}"
                );
            }
        }
    }

    #[test]
    fn disabled_jitter_is_deterministic() {
        let policy = policy(false);
        let a = policy.delay_for_attempt(4);
        let b = policy.delay_for_attempt(4);
        assert_eq!(a, b);
        assert_eq!(a, Duration::from_secs(8));
    }

    #[test]
    fn custom_progression_is_honored() {
        let policy = BackoffPolicy::new(BackoffConfig {
            default_backoff_seconds: vec![0, 0, 0],
            jitter_enabled: false,
            ..BackoffConfig::default()
        });
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
        // Past the custom table, the exponential fallback takes over.
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
    }
}
