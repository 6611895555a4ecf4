use rand::Rng;
use std::time::Duration;

/// Retry schedule for one verification campaign. The policy is a plain value
/// handed to the scheduler at construction; callers that want the documented
/// defaults use [`BackoffPolicy::DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: i32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// DNS propagation can legitimately take tens of minutes, so the cap sits
    /// at five minutes rather than hammering the authority; jitter breaks up
    /// retry storms when many domains verify at once.
    pub const DEFAULT: BackoffPolicy = BackoffPolicy {
        max_attempts: 10,
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(300),
        multiplier: 1.5,
        jitter: Duration::from_secs(5),
    };

    /// `min(initial * multiplier^(n-1), max) + uniform(0, jitter)`.
    pub fn next_delay(&self, attempt_number: i32) -> Duration {
        let exponent = attempt_number.max(1) - 1;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = if self.jitter.is_zero() {
            0.0
        } else {
            rand::rng().random_range(0.0..self.jitter.as_secs_f64())
        };

        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::DEFAULT
        }
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = BackoffPolicy::DEFAULT;
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_delay, Duration::from_secs(30));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert_eq!(policy.multiplier, 1.5);
        assert_eq!(policy.jitter, Duration::from_secs(5));
    }

    #[test]
    fn delays_grow_exponentially_without_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(1), Duration::from_secs(30));
        assert_eq!(policy.next_delay(2), Duration::from_secs(45));
        assert_eq!(policy.next_delay(3), Duration::from_secs_f64(67.5));
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        let policy = no_jitter();
        let mut previous = Duration::ZERO;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.next_delay(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        // Deep into the schedule the cap holds exactly.
        assert_eq!(policy.next_delay(50), policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_its_bound() {
        let policy = BackoffPolicy::DEFAULT;
        for _ in 0..100 {
            let delay = policy.next_delay(1);
            assert!(delay >= policy.initial_delay);
            assert!(delay <= policy.initial_delay + policy.jitter);
        }
    }

    #[test]
    fn attempt_numbers_below_one_are_clamped() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(0), policy.next_delay(1));
        assert_eq!(policy.next_delay(-3), policy.next_delay(1));
    }
}
