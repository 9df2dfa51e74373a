//! Errors of the caller-facing API.
//!
//! Only programmer errors live here. Network failures, timeouts and aborts
//! are reported as a [`FetchOutcome`](crate::session::FetchOutcome) instead.

use thiserror::Error;

use crate::config::ConfigError;
use crate::progress::ProgressError;

/// A misuse of the fetch API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The caller already drives a session.
    #[error("a fetch is already in flight on this caller")]
    AlreadyRunning,

    /// The retry/timing configuration is unusable.
    #[error("invalid fetch configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The progress parent could not take the session's leaves.
    #[error("progress tree misuse: {0}")]
    Progress(#[from] ProgressError),
}
