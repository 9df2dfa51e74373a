//! Failure taxonomy for fetch attempts.

use std::fmt;

/// Why an attempt (or a whole session) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureKind {
    /// Cancelled by the user, or the transport acknowledged a cancellation.
    UserAbort,
    /// Low-level transport failure (connection reset, DNS, ...).
    TransportError,
    /// The request completed with a status outside `200..=299`.
    HttpStatusNot200,
    /// The loading deadline passed, or the transport reported a timeout.
    Timeout,
    /// Anything else, e.g. a transport that vanished without a terminal event.
    UnknownError,
}

/// What the session may do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Surface the failure immediately.
    NeverRetry,
    /// Retry if the retry limit still allows it.
    RetryIfAllowed,
}

impl FailureKind {
    /// Map a failure onto the retry decision.
    ///
    /// ```rust
    /// use resilient_fetch::retry::{FailureKind, RetryDecision};
    ///
    /// assert_eq!(FailureKind::HttpStatusNot200.classify(), RetryDecision::RetryIfAllowed);
    /// assert_eq!(FailureKind::UnknownError.classify(), RetryDecision::NeverRetry);
    /// ```
    pub fn classify(self) -> RetryDecision {
        match self {
            FailureKind::TransportError | FailureKind::HttpStatusNot200 | FailureKind::Timeout => {
                RetryDecision::RetryIfAllowed
            }
            FailureKind::UserAbort | FailureKind::UnknownError => RetryDecision::NeverRetry,
        }
    }

    /// Shorthand for `classify() == RetryIfAllowed`.
    pub fn is_retryable(self) -> bool {
        self.classify() == RetryDecision::RetryIfAllowed
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::UserAbort => "aborted by user",
            FailureKind::TransportError => "transport error",
            FailureKind::HttpStatusNot200 => "unexpected HTTP status",
            FailureKind::Timeout => "timed out",
            FailureKind::UnknownError => "unknown error",
        };
        f.write_str(name)
    }
}

/// The failure that ended an attempt or a session.
///
/// Operational failures are values, not `Err`s of the caller API: a
/// [`FetchOutcome`](crate::session::FetchOutcome) carries one when the
/// session did not succeed.
///
/// # Examples
///
/// ```rust
/// use resilient_fetch::retry::{FailureKind, FetchFailure};
///
/// let failure = FetchFailure::http_status(503);
/// assert_eq!(failure.kind(), FailureKind::HttpStatusNot200);
/// assert_eq!(failure.status(), Some(503));
/// assert_eq!(failure.to_string(), "unexpected HTTP status (status 503)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    kind: FailureKind,
    status: Option<u16>,
    message: Option<String>,
}

impl FetchFailure {
    /// A failure with no further detail.
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            status: None,
            message: None,
        }
    }

    /// A user abort.
    pub fn aborted() -> Self {
        Self::new(FailureKind::UserAbort)
    }

    /// A non-2xx completion.
    pub fn http_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::new(FailureKind::HttpStatusNot200)
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The failure kind.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The HTTP status, for [`FailureKind::HttpStatusNot200`].
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Transport-supplied detail, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchFailure {}
