//! Backoff and retry policies.
//!
//! `delay(attempt) = min(base_delay * multiplier^(attempt - 1), max_delay)`
//!
//! The schedule is pure and deterministic; jitter is opt-in and only ever
//! shortens a delay, so the cap holds either way.

use std::time::Duration;

use rand::Rng;

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor per attempt (values below 1.0 are treated as 1.0)
    pub multiplier: f64,
    /// Random reduction factor in `[0, 1]`; `None` disables jitter
    pub jitter: Option<f64>,
}

impl BackoffPolicy {
    /// Create a policy without jitter.
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { base_delay, max_delay, multiplier, jitter: None }
    }

    /// Same delay for every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0)
    }

    /// Enable jitter: each delay is scaled by a random factor in
    /// `[1 - factor, 1]`.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Some(factor.clamp(0.0, 1.0));
        self
    }

    /// Deterministic delay before retry number `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = if self.multiplier.is_finite() { self.multiplier.max(1.0) } else { 1.0 };

        let max_nanos = self.max_delay.as_nanos() as f64;
        let nanos = self.base_delay.as_nanos() as f64 * multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= max_nanos {
            return self.max_delay;
        }

        Duration::from_nanos(nanos.round() as u64).min(self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter applied if enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        match self.jitter {
            Some(factor) if factor > 0.0 => {
                let scale = 1.0 - rand::thread_rng().gen_range(0.0..=factor);
                delay.mul_f64(scale)
            }
            _ => delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10), 2.0)
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempt budget plus backoff schedule for unary calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum underlying calls per `execute` (at least 1)
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff }
    }

    /// A single attempt with no replay.
    pub fn no_retry() -> Self {
        Self::new(1, BackoffPolicy::default())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, BackoffPolicy::default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 2.0)
    }

    #[test]
    fn test_exponential_schedule() {
        let policy = policy();

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1600));
        assert_eq!(policy.delay(6), Duration::from_secs(2));
    }

    #[test]
    fn test_attempt_zero_is_first_attempt() {
        assert_eq!(policy().delay(0), policy().delay(1));
    }

    #[test]
    fn test_non_decreasing_and_capped() {
        let policies = [
            policy(),
            BackoffPolicy::new(Duration::from_millis(7), Duration::from_millis(950), 1.7),
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(1), 3.0),
            BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(5), 0.5),
            BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(5), f64::NAN),
        ];

        for policy in policies {
            let mut previous = Duration::ZERO;
            for attempt in 1..200 {
                let delay = policy.delay(attempt);
                assert!(delay >= previous, "{:?} decreased at attempt {}", policy, attempt);
                assert!(delay <= policy.max_delay, "{:?} exceeded cap at attempt {}", policy, attempt);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        assert_eq!(policy().delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_base_above_max_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_policy() {
        let policy = BackoffPolicy::constant(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(10), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy().with_jitter(0.5);

        for attempt in 1..10 {
            let plain = policy.delay(attempt);
            for _ in 0..50 {
                let jittered = policy.next_delay(attempt);
                assert!(jittered <= plain);
                assert!(jittered >= plain.mul_f64(0.5));
            }
        }
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        assert_eq!(policy().next_delay(3), policy().delay(3));
    }

    #[test]
    fn test_retry_policy_has_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, BackoffPolicy::default()).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
