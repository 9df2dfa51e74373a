//! Per-session timing and retry configuration.
//!
//! [`RetryWaitParams`] is immutable for the lifetime of a session. All
//! fields have defaults, and with the `serde` feature a partial document
//! fills in the rest:
//!
//! ```rust
//! # #[cfg(feature = "serde")] {
//! use resilient_fetch::config::RetryWaitParams;
//!
//! let params: RetryWaitParams =
//!     serde_json::from_str(r#"{ "retryTimesMax": 3 }"#).unwrap();
//!
//! assert_eq!(params.retry_times_max, 3);
//! assert_eq!(params.loading_timeout_ms, 60_000);
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::retry::{RetryLimit, RetryPolicy, MAX_BACKOFF_EXPONENT};

/// Timing and retry settings for one fetch session.
///
/// # Examples
///
/// ```rust
/// use resilient_fetch::config::RetryWaitParams;
/// use resilient_fetch::retry::RetryLimit;
/// use std::time::Duration;
///
/// let params = RetryWaitParams::default()
///     .with_loading_timeout_ms(0)
///     .with_retry_times_max(-1);
///
/// assert_eq!(params.loading_timeout(), None);
/// assert_eq!(params.retry_limit(), RetryLimit::Unlimited);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct RetryWaitParams {
    /// Loading deadline per attempt. 0 disables the timer; progress then
    /// follows the transport's byte counts.
    pub loading_timeout_ms: u64,
    /// Interval of the loading progress timer.
    pub loading_tick_interval_ms: u64,
    /// Retries after the first attempt: negative is unlimited, 0 is none.
    pub retry_times_max: i32,
    /// Cap `e` on the `2^e` second backoff ceiling.
    pub retry_backoff_exponent_max: u32,
    /// Interval of the retry-wait progress timer.
    pub retry_tick_interval_ms: u64,
}

impl Default for RetryWaitParams {
    fn default() -> Self {
        Self {
            loading_timeout_ms: 60_000,
            loading_tick_interval_ms: 1_000,
            retry_times_max: 0,
            retry_backoff_exponent_max: 6,
            retry_tick_interval_ms: 1_000,
        }
    }
}

impl RetryWaitParams {
    /// Set the loading deadline (0 disables it).
    pub fn with_loading_timeout_ms(mut self, ms: u64) -> Self {
        self.loading_timeout_ms = ms;
        self
    }

    /// Set the loading progress tick.
    pub fn with_loading_tick_interval_ms(mut self, ms: u64) -> Self {
        self.loading_tick_interval_ms = ms;
        self
    }

    /// Set the signed retry count.
    pub fn with_retry_times_max(mut self, times: i32) -> Self {
        self.retry_times_max = times;
        self
    }

    /// Set the backoff exponent cap.
    pub fn with_retry_backoff_exponent_max(mut self, exponent: u32) -> Self {
        self.retry_backoff_exponent_max = exponent;
        self
    }

    /// Set the retry-wait progress tick.
    pub fn with_retry_tick_interval_ms(mut self, ms: u64) -> Self {
        self.retry_tick_interval_ms = ms;
        self
    }

    /// The loading deadline, if enabled.
    pub fn loading_timeout(&self) -> Option<Duration> {
        (self.loading_timeout_ms > 0).then(|| Duration::from_millis(self.loading_timeout_ms))
    }

    /// The loading tick interval.
    pub fn loading_tick_interval(&self) -> Duration {
        Duration::from_millis(self.loading_tick_interval_ms)
    }

    /// The retry-wait tick interval.
    pub fn retry_tick_interval(&self) -> Duration {
        Duration::from_millis(self.retry_tick_interval_ms)
    }

    /// The decoded retry limit.
    pub fn retry_limit(&self) -> RetryLimit {
        RetryLimit::from(self.retry_times_max)
    }

    /// The retry policy these params describe.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_times_max, self.retry_backoff_exponent_max)
    }

    /// Check the params are usable.
    ///
    /// Zero tick intervals would spin the timers, and exponents past
    /// [`MAX_BACKOFF_EXPONENT`] overflow the wait.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loading_timeout_ms > 0 && self.loading_tick_interval_ms == 0 {
            return Err(ConfigError::ZeroLoadingTick);
        }
        if self.retry_limit().permits_any() && self.retry_tick_interval_ms == 0 {
            return Err(ConfigError::ZeroRetryTick);
        }
        if self.retry_backoff_exponent_max > MAX_BACKOFF_EXPONENT {
            return Err(ConfigError::ExponentTooLarge {
                exponent: self.retry_backoff_exponent_max,
                max: MAX_BACKOFF_EXPONENT,
            });
        }
        Ok(())
    }
}

/// A [`RetryWaitParams`] that cannot drive a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A loading timeout is set but its tick interval is zero.
    #[error("loadingTickIntervalMs must be positive when loadingTimeoutMs is set")]
    ZeroLoadingTick,

    /// Retries are enabled but the retry tick interval is zero.
    #[error("retryTickIntervalMs must be positive when retries are enabled")]
    ZeroRetryTick,

    /// The backoff exponent cap is out of range.
    #[error("retryBackoffExponentMax {exponent} exceeds {max}")]
    ExponentTooLarge {
        /// The configured exponent.
        exponent: u32,
        /// The largest accepted exponent.
        max: u32,
    },
}

#[cfg(feature = "proptest")]
impl proptest::arbitrary::Arbitrary for RetryWaitParams {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;

        (
            prop_oneof![Just(0u64), 1u64..120_000],
            1u64..5_000,
            -1i32..10,
            0u32..=MAX_BACKOFF_EXPONENT,
            1u64..5_000,
        )
            .prop_map(
                |(timeout, loading_tick, retries, exponent, retry_tick)| RetryWaitParams {
                    loading_timeout_ms: timeout,
                    loading_tick_interval_ms: loading_tick,
                    retry_times_max: retries,
                    retry_backoff_exponent_max: exponent,
                    retry_tick_interval_ms: retry_tick,
                },
            )
            .boxed()
    }
}
