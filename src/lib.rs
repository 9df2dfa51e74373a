//! # Resilient Fetch
//!
//! Resilient network fetches with weighted progress trees.
//!
//! A fetch is a small state machine: an attempt is in flight (`Loading`),
//! or the engine waits out a randomized exponential backoff
//! (`RetryWaiting`), until it succeeds, runs out of retries or is aborted.
//! Every phase drives a leaf in a [`ProgressTree`] so a UI can render one
//! bar for the whole attempt series, nested inside whatever larger
//! operation it belongs to.
//!
//! ## Quick Example
//!
//! ```rust
//! use resilient_fetch::prelude::*;
//! use resilient_fetch::testing::ScriptedTransport;
//! use std::sync::Arc;
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread()
//! #     .enable_all()
//! #     .start_paused(true)
//! #     .build()
//! #     .unwrap();
//! # runtime.block_on(async {
//! // Fails twice, then answers.
//! let transport = ScriptedTransport::new()
//!     .fail_with("connection reset")
//!     .fail_with("connection reset")
//!     .respond(200, "weights");
//!
//! let caller = FetchCaller::new(Arc::new(transport), ProgressParent::detached());
//! let params = RetryWaitParams::default()
//!     .with_retry_times_max(2)
//!     .with_retry_backoff_exponent_max(0);
//!
//! let outcome = caller
//!     .start_as_promise(FetchRequest::get("https://example.com/weights"), params)
//!     .await?;
//!
//! assert_eq!(outcome.attempts(), 3);
//! assert_eq!(outcome.payload().map(|r| &r.body()[..]), Some(&b"weights"[..]));
//! # Ok::<(), FetchError>(())
//! # }).unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`progress`]: the weighted progress tree.
//! - [`retry`]: failure taxonomy, retry limits and backoff.
//! - [`config`]: per-session timing and retry settings.
//! - [`transport`]: the event contract a transport fulfils.
//! - [`session`]: the fetch state machine.
//! - [`caller`]: single-flight facade with promise and sequence forms.
//! - [`testing`]: scripted transport and assertion macros.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod caller;
pub mod config;
pub mod error;
pub mod progress;
pub mod retry;
pub mod session;
pub mod testing;
pub mod transport;

// Re-exports
pub use caller::{FetchCaller, FetchSteps};
pub use config::{ConfigError, RetryWaitParams};
pub use error::FetchError;
pub use progress::{NodeId, ProgressError, ProgressParent, ProgressTree, SharedProgress};
pub use retry::{FailureKind, FetchFailure, RetryLimit, RetryPolicy};
pub use session::{FetchOutcome, FetchSession, Phase, ProgressReport, Step};
pub use transport::{FetchRequest, FetchResponse, Transport, TransportEvent};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::caller::{FetchCaller, FetchSteps};
    pub use crate::config::RetryWaitParams;
    pub use crate::error::FetchError;
    pub use crate::progress::{ProgressParent, SharedProgress};
    pub use crate::retry::FailureKind;
    pub use crate::session::{FetchOutcome, Phase, Step};
    pub use crate::transport::{FetchRequest, Transport};
}
