//! Retry policy for outbound calls.
//!
//! Exponential backoff with jitter. A sender whose call was refused keeps
//! the call on its outbound queue and retries until the policy's attempt
//! budget is exhausted, at which point a 503 goes back to the caller.

use crate::clock::Milliseconds;
use crate::dists::SimRng;
use serde::{Deserialize, Serialize};

/// Backoff configuration for a retried outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: Milliseconds,
    pub backoff_factor: f64,
    pub max_delay_ms: Milliseconds,
    /// Fraction of the delay to randomize, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100.0,
            backoff_factor: 2.0,
            max_delay_ms: 5000.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt`, with the configured jitter
    /// applied as a `1 + (2u - 1) * jitter` multiplier.
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut SimRng) -> Milliseconds {
        let mut delay = self.initial_delay_ms * self.backoff_factor.powi(attempt as i32);
        if delay > self.max_delay_ms {
            delay = self.max_delay_ms;
        }
        if self.jitter > 0.0 {
            delay *= 1.0 + (2.0 * rng.p() - 1.0) * self.jitter;
        }
        delay.max(0.0)
    }
}

/// Retry progress for a single queued outbound call.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub policy: RetryPolicy,
    pub attempt: u32,
    pub next_retry_at: Milliseconds,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            next_retry_at: 0.0,
        }
    }

    /// Whether the attempt budget is spent.
    pub fn exhausted(&self) -> bool {
        self.attempt > self.policy.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100.0,
            backoff_factor: 2.0,
            max_delay_ms: 5000.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = no_jitter();
        let mut rng = SimRng::new(1);
        assert_eq!(policy.delay_for_attempt(0, &mut rng), 100.0);
        assert_eq!(policy.delay_for_attempt(1, &mut rng), 200.0);
        assert_eq!(policy.delay_for_attempt(2, &mut rng), 400.0);
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = no_jitter();
        let mut rng = SimRng::new(1);
        assert_eq!(policy.delay_for_attempt(10, &mut rng), 5000.0);
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..no_jitter()
        };
        let mut rng = SimRng::new(42);
        for _ in 0..100 {
            let d = policy.delay_for_attempt(1, &mut rng);
            assert!((160.0..=240.0).contains(&d), "delay {} outside band", d);
        }
    }

    #[test]
    fn test_exhausted_after_max_retries() {
        let mut state = RetryState::new(no_jitter());
        assert!(!state.exhausted());
        state.attempt = 3;
        assert!(!state.exhausted());
        state.attempt = 4;
        assert!(state.exhausted());
    }

    #[test]
    fn test_default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 100.0);
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.max_delay_ms, 5000.0);
        assert_eq!(policy.jitter, 0.2);
    }
}
