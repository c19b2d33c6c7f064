use rand::Rng;
use std::time::Duration;

const MAX_GROWTH: u32 = 8;

/// Exponential retry delay, optionally jittered over `0..=delay`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Starts at the configured retry delay and grows up to eight times it.
    pub fn from_retry_delay(retry_delay: Duration) -> Self {
        Self::new(retry_delay, retry_delay.saturating_mul(MAX_GROWTH), true)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let ceiling = self.base.saturating_mul(factor).min(self.max);
        if self.jitter && !ceiling.is_zero() {
            rng.gen_range(Duration::ZERO..=ceiling)
        } else {
            ceiling
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(16), false);
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<_> = (0..5)
            .map(|attempt| backoff.delay_with_rng(attempt, &mut rng).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 16]);
    }

    #[test]
    fn retry_delay_growth_is_capped_at_eight_times() {
        let backoff = Backoff::from_retry_delay(Duration::from_millis(100));
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..10 {
            assert!(backoff.delay_with_rng(attempt, &mut rng) <= Duration::from_millis(800));
        }
    }

    #[test]
    fn zero_retry_delay_never_sleeps() {
        let backoff = Backoff::from_retry_delay(Duration::ZERO);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}
