//! Retry budget and backoff for failed attempts.
//!
//! A logical call may be resent after a transport failure, or after the
//! error classifier flags a response as transient. Both draw from one
//! budget; redirects are counted separately by the engine.
//!
//! # Example
//!
//! ```
//! use awsutils::engine::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transport, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("resending in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("giving up: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default number of resends after the first attempt.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Default delay before the first resend (100ms).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default delay cap (2 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Why an attempt is being resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Connect, write or read failed before any body byte was committed.
    Transport,
    /// The error classifier flagged the decoded response as transient.
    Classified,
}

/// Decision on whether to resend a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend after the specified delay.
    Retry {
        /// How long to wait before resending.
        delay: Duration,
        /// Which attempt this will be (1-indexed, so the first resend is attempt 2).
        attempt: u32,
    },

    /// Give up and surface the failure.
    DoNotRetry {
        /// Human-readable reason why the attempt is not resent.
        reason: String,
    },
}

/// Retry budget with capped exponential backoff.
///
/// # Default Values
///
/// - `budget`: 3 resends
/// - `base_delay`: 100ms
/// - `max_delay`: 2 seconds
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(retry - 1), max_delay) + jitter(0..=base_delay / 2)
/// ```
///
/// A zero `base_delay` resends immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resends allowed after the first attempt.
    budget: u32,

    /// Delay before the first resend.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: DEFAULT_RETRY_BUDGET,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    #[must_use]
    pub fn new(budget: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            budget,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Same backoff with a different budget.
    #[must_use]
    pub fn with_budget(&self, budget: u32) -> Self {
        Self {
            budget,
            ..self.clone()
        }
    }

    /// Policy that resends immediately, up to `budget` times.
    #[must_use]
    pub fn immediate(budget: u32) -> Self {
        Self::new(budget, Duration::ZERO, Duration::ZERO)
    }

    /// Resends allowed after the first attempt.
    #[must_use]
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Decides whether to resend after a failure.
    ///
    /// `used` is the number of resends already spent on this call.
    #[instrument(skip(self), fields(budget = self.budget))]
    pub fn should_retry(&self, failure: FailureType, used: u32) -> RetryDecision {
        if used >= self.budget {
            debug!(used, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("retry budget ({}) exhausted", self.budget),
            };
        }
        let delay = self.calculate_delay(used + 1);
        debug!(
            next_attempt = used + 2,
            delay_ms = delay.as_millis(),
            "will resend"
        );
        RetryDecision::Retry {
            delay,
            attempt: used + 2,
        }
    }

    /// Backoff before the `retry`-th resend (1-indexed).
    fn calculate_delay(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        delay + self.calculate_jitter()
    }

    /// Random jitter between zero and half the base delay.
    fn calculate_jitter(&self) -> Duration {
        let max = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
