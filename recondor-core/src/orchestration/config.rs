use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy applied when jobs fail retryably or leases expire.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Exponential delay before the given attempt (1-based), without jitter.
    pub fn base_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = (attempt.saturating_sub(1)) as i32;
        let scaled = (self.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    /// Base delay spread by ±25% so racing retries do not synchronise.
    pub fn jittered_delay_ms(&self, attempt: u16, rng: &mut impl Rng) -> u64 {
        let base = self.base_delay_ms(attempt);
        if base == 0 {
            return 0;
        }

        let upper_cap = self.backoff_max_ms.max(1);
        let capped = base.min(upper_cap);
        let spread = (capped as f64 * 0.25).max(1.0);
        let lower = (capped as f64 - spread).max(1.0);
        let upper = (capped as f64 + spread).min(upper_cap as f64);

        rng.random_range(lower..=upper).round() as u64
    }
}

/// Lease lifetime and maintenance cadence.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub lease_ttl_secs: u64,
    pub heartbeat_interval_ms: u64,
    pub housekeeper_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 120,
            heartbeat_interval_ms: 30_000,
            housekeeper_interval_ms: 15_000,
        }
    }
}

impl LeaseConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn housekeeper_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeper_interval_ms)
    }
}

/// Top-level orchestrator tuning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of concurrent worker tasks running the claim loop.
    pub workers: usize,
    /// Idle sleep between claim attempts when no job is ready.
    pub poll_interval_ms: u64,
    pub retry: RetryConfig,
    pub lease: LeaseConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            retry: RetryConfig::default(),
            lease: LeaseConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 500,
        };
        assert_eq!(retry.base_delay_ms(1), 100);
        assert_eq!(retry.base_delay_ms(2), 200);
        assert_eq!(retry.base_delay_ms(3), 400);
        assert_eq!(retry.base_delay_ms(4), 500);
        assert_eq!(retry.base_delay_ms(10), 500);
    }

    #[test]
    fn jitter_stays_within_quarter_spread() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        };
        let mut rng = rand::rng();
        for _ in 0..100 {
            let delay = retry.jittered_delay_ms(3, &mut rng);
            // base at attempt 3 is 4000ms
            assert!((3_000..=5_000).contains(&delay), "delay {delay} out of band");
        }
    }
}
