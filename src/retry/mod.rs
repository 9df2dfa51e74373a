//! Retry decisions for fetch sessions.
//!
//! Everything in this module is pure data plus pure functions:
//!
//! - **Whether** to retry: [`RetryLimit`] / [`RetryPolicy::is_attempt_allowed`]
//! - **How long** to wait: truncated binary exponential backoff with full
//!   jitter, [`RetryPolicy::backoff_wait`]
//! - **Which** failures qualify: [`FailureKind::classify`]
//!
//! # Quick Start
//!
//! ```rust
//! use resilient_fetch::retry::{FailureKind, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! // Two retries, waits capped at 2^6 seconds.
//! let policy = RetryPolicy::new(2, 6);
//!
//! assert!(policy.is_attempt_allowed(0));
//! assert!(policy.is_attempt_allowed(1));
//! assert!(!policy.is_attempt_allowed(2));
//!
//! // The first retry always waits exactly one second.
//! assert_eq!(policy.backoff_wait(0), Duration::from_secs(1));
//!
//! assert_eq!(FailureKind::UserAbort.classify(), RetryDecision::NeverRetry);
//! assert_eq!(FailureKind::Timeout.classify(), RetryDecision::RetryIfAllowed);
//! ```
//!
//! # Backoff
//!
//! Before retry `k` (0-indexed) the wait is a whole number of seconds drawn
//! uniformly from `[1, 2^min(k, exponent_max)]`. Use
//! [`RetryPolicy::backoff_wait_with`] to supply a seeded RNG in tests.

mod error;
mod policy;

pub use error::{FailureKind, FetchFailure, RetryDecision};
pub use policy::{
    backoff_wait_ms, backoff_wait_ms_with, is_attempt_allowed, RetryLimit, RetryPolicy,
    MAX_BACKOFF_EXPONENT,
};
