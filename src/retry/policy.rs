//! Retry limits and backoff computation.

use std::time::Duration;

use rand::Rng;

/// Largest backoff exponent accepted; `2^30` seconds is already decades.
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// How many retries may follow the first attempt.
///
/// The configuration surface encodes this as a signed integer:
/// negative means unlimited, zero means none, positive is a bound.
///
/// # Examples
///
/// ```rust
/// use resilient_fetch::retry::RetryLimit;
///
/// assert_eq!(RetryLimit::from(-1), RetryLimit::Unlimited);
/// assert_eq!(RetryLimit::from(0), RetryLimit::Never);
/// assert_eq!(RetryLimit::from(3), RetryLimit::Times(3));
/// assert_eq!(RetryLimit::Times(3).as_i32(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryLimit {
    /// Only the first attempt.
    #[default]
    Never,
    /// At most this many retries.
    Times(u32),
    /// Retry until success or abort.
    Unlimited,
}

impl RetryLimit {
    /// Returns true if another retry may follow `retries_so_far` retries.
    pub fn allows(&self, retries_so_far: u32) -> bool {
        match self {
            RetryLimit::Never => false,
            RetryLimit::Times(max) => retries_so_far < *max,
            RetryLimit::Unlimited => true,
        }
    }

    /// Returns true if at least one retry could ever happen.
    pub fn permits_any(&self) -> bool {
        self.allows(0)
    }

    /// The signed configuration encoding.
    pub fn as_i32(&self) -> i32 {
        match self {
            RetryLimit::Never => 0,
            RetryLimit::Times(max) => i32::try_from(*max).unwrap_or(i32::MAX),
            RetryLimit::Unlimited => -1,
        }
    }
}

impl From<i32> for RetryLimit {
    fn from(value: i32) -> Self {
        match value {
            v if v < 0 => RetryLimit::Unlimited,
            0 => RetryLimit::Never,
            v => RetryLimit::Times(v.unsigned_abs()),
        }
    }
}

/// A retry policy: the retry limit plus the backoff exponent cap.
///
/// Policies are pure data. They describe retry behavior but don't execute
/// it; a [`FetchSession`](crate::session::FetchSession) does that.
///
/// # Examples
///
/// ```rust
/// use resilient_fetch::retry::{RetryLimit, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(-1, 3);
/// assert_eq!(policy.limit(), RetryLimit::Unlimited);
///
/// // Retry 10 is capped at 2^3 seconds.
/// assert_eq!(policy.max_backoff(10), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: RetryLimit,
    exponent_max: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: RetryLimit::Never,
            exponent_max: 6,
        }
    }
}

impl RetryPolicy {
    /// Build from the signed retry count and the exponent cap.
    pub fn new(retry_times_max: i32, exponent_max: u32) -> Self {
        Self {
            limit: RetryLimit::from(retry_times_max),
            exponent_max: exponent_max.min(MAX_BACKOFF_EXPONENT),
        }
    }

    /// Replace the retry limit.
    pub fn with_limit(mut self, limit: RetryLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Replace the exponent cap.
    pub fn with_exponent_max(mut self, exponent_max: u32) -> Self {
        self.exponent_max = exponent_max.min(MAX_BACKOFF_EXPONENT);
        self
    }

    /// The retry limit.
    pub fn limit(&self) -> RetryLimit {
        self.limit
    }

    /// The exponent cap.
    pub fn exponent_max(&self) -> u32 {
        self.exponent_max
    }

    /// Returns true if another retry may follow `retries_so_far` retries.
    pub fn is_attempt_allowed(&self, retries_so_far: u32) -> bool {
        self.limit.allows(retries_so_far)
    }

    /// Upper bound of the wait before retry `attempt_index`.
    pub fn max_backoff(&self, attempt_index: u32) -> Duration {
        Duration::from_secs(1u64 << attempt_index.min(self.exponent_max))
    }

    /// Wait before retry `attempt_index`, using the thread-local RNG.
    pub fn backoff_wait(&self, attempt_index: u32) -> Duration {
        self.backoff_wait_with(attempt_index, &mut rand::rng())
    }

    /// Wait before retry `attempt_index`, drawing from `rng`.
    pub fn backoff_wait_with<R: Rng>(&self, attempt_index: u32, rng: &mut R) -> Duration {
        Duration::from_millis(backoff_wait_ms_with(attempt_index, self.exponent_max, rng))
    }
}

/// Returns true if `retry_times_max` (signed encoding) permits another retry
/// after `attempts_so_far` retries.
///
/// ```rust
/// use resilient_fetch::retry::is_attempt_allowed;
///
/// assert!(is_attempt_allowed(-1, 1_000));
/// assert!(!is_attempt_allowed(0, 0));
/// assert!(is_attempt_allowed(2, 1));
/// assert!(!is_attempt_allowed(2, 2));
/// ```
pub fn is_attempt_allowed(retry_times_max: i32, attempts_so_far: u32) -> bool {
    RetryLimit::from(retry_times_max).allows(attempts_so_far)
}

/// Truncated binary exponential backoff with full jitter, in milliseconds.
///
/// Returns `1000 * n` where `n` is uniform in `[1, 2^min(attempt_index,
/// exponent_max)]`.
///
/// ```rust
/// use resilient_fetch::retry::backoff_wait_ms;
///
/// assert_eq!(backoff_wait_ms(0, 6), 1000);
/// let wait = backoff_wait_ms(3, 6);
/// assert!((1000..=8000).contains(&wait));
/// assert_eq!(wait % 1000, 0);
/// ```
pub fn backoff_wait_ms(attempt_index: u32, exponent_max: u32) -> u64 {
    backoff_wait_ms_with(attempt_index, exponent_max, &mut rand::rng())
}

/// [`backoff_wait_ms`] with a caller-supplied RNG.
pub fn backoff_wait_ms_with<R: Rng>(
    attempt_index: u32,
    exponent_max: u32,
    rng: &mut R,
) -> u64 {
    let exponent = attempt_index.min(exponent_max).min(MAX_BACKOFF_EXPONENT);
    let ceiling = 1u64 << exponent;
    rng.random_range(1..=ceiling) * 1000
}
