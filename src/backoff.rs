// ABOUTME: Exponential backoff policy for reconnecting after unexpected closes.
// ABOUTME: Delays grow 1s, 2s, 4s... plus jitter, capped at 30s.

use rand::Rng;
use std::time::Duration;

/// Delay policy for retry-with-backoff reconnects.
///
/// The computed delay is `min(max_delay, base_delay * 2^attempt + jitter)`
/// with jitter drawn uniformly from `[0, jitter_ms)` per call, so a fleet of
/// agents restarting at the same moment spreads its reconnects out.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter_ms: 1_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next reconnect attempt, drawing fresh jitter from `rng`.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let jitter = Duration::from_millis(rng.gen_range(0..self.jitter_ms.max(1)));
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic delay for a fixed jitter value. Saturates instead of
    /// overflowing for very large attempt counts.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .saturating_add(jitter.as_millis() as u64);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn doubles_until_capped() {
        let policy = BackoffPolicy::default();
        let zero = Duration::ZERO;

        assert_eq!(policy.delay_with_jitter(0, zero), Duration::from_millis(1_000));
        assert_eq!(policy.delay_with_jitter(1, zero), Duration::from_millis(2_000));
        assert_eq!(policy.delay_with_jitter(2, zero), Duration::from_millis(4_000));
        assert_eq!(policy.delay_with_jitter(3, zero), Duration::from_millis(8_000));
        assert_eq!(policy.delay_with_jitter(4, zero), Duration::from_millis(16_000));
        // 32s exceeds the cap
        assert_eq!(policy.delay_with_jitter(5, zero), Duration::from_millis(30_000));
        assert_eq!(policy.delay_with_jitter(6, zero), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_is_added_before_the_cap() {
        let policy = BackoffPolicy::default();
        let jitter = Duration::from_millis(999);

        assert_eq!(
            policy.delay_with_jitter(0, jitter),
            Duration::from_millis(1_999)
        );
        // Once the deterministic component reaches the cap, jitter is absorbed
        assert_eq!(
            policy.delay_with_jitter(5, jitter),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn delay_stays_within_bounds_for_any_attempt() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..64 {
            let delay = policy.delay(attempt, &mut rng);
            assert!(delay >= policy.base_delay, "attempt {attempt}: {delay:?}");
            assert!(delay <= policy.max_delay, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn huge_attempt_counts_saturate_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_with_jitter(u32::MAX, Duration::from_millis(500)),
            policy.max_delay
        );
    }
}
