//! The terminal result of a fetch session.

use std::time::Duration;

use crate::retry::{FailureKind, FetchFailure};
use crate::transport::FetchResponse;

/// How a session ended, with the metadata of the attempt series.
///
/// Either the successful response or the failure that ended the series,
/// plus the number of attempts made and the total time spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    result: Result<FetchResponse, FetchFailure>,
    attempts: u32,
    elapsed: Duration,
}

impl FetchOutcome {
    pub(crate) fn new(
        result: Result<FetchResponse, FetchFailure>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            result,
            attempts,
            elapsed,
        }
    }

    /// Borrow the result.
    pub fn result(&self) -> Result<&FetchResponse, &FetchFailure> {
        self.result.as_ref()
    }

    /// Take the result, discarding metadata.
    pub fn into_result(self) -> Result<FetchResponse, FetchFailure> {
        self.result
    }

    /// The response, if the session succeeded.
    pub fn payload(&self) -> Option<&FetchResponse> {
        self.result.as_ref().ok()
    }

    /// Take the response, if the session succeeded.
    pub fn into_payload(self) -> Option<FetchResponse> {
        self.result.ok()
    }

    /// The terminating failure, if the session did not succeed.
    pub fn failure(&self) -> Option<&FetchFailure> {
        self.result.as_ref().err()
    }

    /// Kind of the terminating failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(FetchFailure::kind)
    }

    /// Returns true if the session succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true if the session ended by user abort.
    pub fn is_aborted(&self) -> bool {
        self.failure_kind() == Some(FailureKind::UserAbort)
    }

    /// Number of attempts made (initial + retries).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time from session start to completion.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_accessors() {
        let outcome = FetchOutcome::new(
            Ok(FetchResponse::new(200, "body")),
            3,
            Duration::from_secs(2),
        );
        assert!(outcome.is_success());
        assert!(!outcome.is_aborted());
        assert_eq!(outcome.failure_kind(), None);
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_payload().map(|r| r.status()), Some(200));
    }

    #[test]
    fn test_abort_accessors() {
        let outcome = FetchOutcome::new(Err(FetchFailure::aborted()), 2, Duration::ZERO);
        assert!(outcome.is_aborted());
        assert!(outcome.payload().is_none());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UserAbort));
    }
}
