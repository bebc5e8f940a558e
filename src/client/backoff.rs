use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential reconnect delays: `initial`, doubling per attempt, capped at
/// `max`. Each delay is shortened by a random share of up to `jitter` so
/// clients dropped together do not reconnect in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl ReconnectPolicy {
    pub const DEFAULT_JITTER: f64 = 0.2;

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: Self::DEFAULT_JITTER,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let cut = rng.gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 - cut)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default().reconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn doubles_until_the_cap() {
        let policy = ReconnectPolicy::default().with_jitter(0.0);
        let delays: Vec<u64> = (1..=8)
            .map(|n| policy.base_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            [500, 1000, 2000, 4000, 8000, 16000, 30000, 30000]
        );
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay(10_000), Duration::from_secs(30));
        assert_eq!(policy.base_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=12 {
            let base = policy.base_delay(attempt);
            for _ in 0..50 {
                let d = policy.delay_with(attempt, &mut rng);
                assert!(d <= base);
                assert!(d >= base.mul_f64(0.8));
            }
        }
    }
}
