//! Transport backoff for the repository client
//!
//! After a run of consecutive transport failures, further calls are mostly
//! skipped instead of retried every time; a small probabilistic sample still
//! goes through so recovery is noticed. Any success resets the counter. This
//! is a best-effort limiter, not a correctness mechanism - check-then-act
//! races on the shared counter are acceptable.

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Tunable backoff policy
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Consecutive failures before the limiter trips
    pub failure_threshold: u32,
    /// Probability a call is still attempted once tripped
    pub attempt_probability: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            attempt_probability: 0.1,
        }
    }
}

/// Shared failure counter with probabilistic skip
#[derive(Debug)]
pub struct TransportBackoff {
    policy: BackoffPolicy,
    consecutive_failures: AtomicU32,
}

impl TransportBackoff {
    /// Create with the given policy
    #[inline]
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Whether the next call should be attempted
    #[must_use]
    pub fn should_attempt(&self) -> bool {
        if !self.is_tripped() {
            return true;
        }
        rand::rng().random::<f64>() < self.policy.attempt_probability
    }

    /// Whether the limiter has tripped
    #[inline]
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.policy.failure_threshold
    }

    /// Record a transport success, resetting the counter
    #[inline]
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a transport failure
    #[inline]
    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current consecutive failure count
    #[inline]
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

impl Default for TransportBackoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
