//! The application-facing entry point.
//!
//! A [`FetchCaller`] owns a transport and a progress parent and runs one
//! [`FetchSession`] at a time on them. The same session can be consumed
//! two ways:
//!
//! - [`FetchCaller::start_as_promise`] drives it to the end and returns the
//!   [`FetchOutcome`].
//! - [`FetchCaller::start_as_sequence`] hands back [`FetchSteps`], which
//!   yields a [`Step`] per observable change for a UI loop to render.
//!
//! Both are built on [`FetchSession::step`], so they see the same retries,
//! waits and aborts.
//!
//! # Example
//!
//! ```rust
//! use resilient_fetch::prelude::*;
//! use resilient_fetch::testing::ScriptedTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let caller = FetchCaller::new(
//!     Arc::new(ScriptedTransport::new().respond(200, "weights")),
//!     ProgressParent::detached(),
//! );
//!
//! let mut steps = caller
//!     .start_as_sequence(FetchRequest::get("https://example.com/w"), RetryWaitParams::default())
//!     .unwrap();
//! assert!(caller.is_running());
//!
//! while let Some(step) = steps.next().await {
//!     if let Step::Done(outcome) = step {
//!         assert!(outcome.is_success());
//!     }
//! }
//! assert!(!caller.is_running());
//! assert!(caller.succeeded());
//! # });
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, Stream};
use tracing::{debug, info, warn};

use crate::config::RetryWaitParams;
use crate::error::FetchError;
use crate::progress::ProgressParent;
use crate::retry::FailureKind;
use crate::session::{AbortHandle, FetchOutcome, FetchSession, Phase, Step};
use crate::transport::{FetchRequest, Transport};

#[derive(Debug, Default)]
struct CallerState {
    running: bool,
    abort: Option<AbortHandle>,
    last_attempt_count: u32,
    succeeded: bool,
    last_failure: Option<FailureKind>,
}

struct CallerInner {
    transport: Arc<dyn Transport>,
    progress: ProgressParent,
    state: Mutex<CallerState>,
}

impl CallerInner {
    fn lock(&self) -> MutexGuard<'_, CallerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CallerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerInner")
            .field("progress", &self.progress)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Runs fetches one at a time against a transport.
///
/// Cloning yields another handle to the same caller; the single-flight
/// guard is shared.
#[derive(Debug, Clone)]
pub struct FetchCaller {
    inner: Arc<CallerInner>,
}

impl FetchCaller {
    /// A caller reporting progress under `progress`.
    pub fn new(transport: Arc<dyn Transport>, progress: ProgressParent) -> Self {
        Self {
            inner: Arc::new(CallerInner {
                transport,
                progress,
                state: Mutex::new(CallerState::default()),
            }),
        }
    }

    /// Start a fetch and drive it to the end.
    ///
    /// Fails only on misuse: a fetch already in flight or unusable params.
    pub async fn start_as_promise(
        &self,
        request: FetchRequest,
        params: RetryWaitParams,
    ) -> Result<FetchOutcome, FetchError> {
        Ok(self.start_as_sequence(request, params)?.finish().await)
    }

    /// Start a fetch and hand back its steps.
    pub fn start_as_sequence(
        &self,
        request: FetchRequest,
        params: RetryWaitParams,
    ) -> Result<FetchSteps, FetchError> {
        let mut state = self.inner.lock();
        if state.running {
            warn!(url = request.url(), "fetch already in flight on this caller");
            return Err(FetchError::AlreadyRunning);
        }

        let session = FetchSession::new(
            Arc::clone(&self.inner.transport),
            request,
            params,
            self.inner.progress.clone(),
        )?;
        state.running = true;
        state.abort = Some(session.abort_handle());

        Ok(FetchSteps {
            session,
            caller: Arc::clone(&self.inner),
            landed: false,
        })
    }

    /// Abort the fetch in flight, if any.
    pub fn abort(&self) {
        match &self.inner.lock().abort {
            Some(handle) => {
                info!("abort requested");
                handle.abort();
            }
            None => debug!("abort ignored, no fetch in flight"),
        }
    }

    /// Returns true while a fetch is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Attempts made by the most recent finished fetch.
    pub fn last_attempt_count(&self) -> u32 {
        self.inner.lock().last_attempt_count
    }

    /// Whether the most recent finished fetch succeeded.
    pub fn succeeded(&self) -> bool {
        self.inner.lock().succeeded
    }

    /// Failure kind of the most recent finished fetch.
    pub fn last_failure(&self) -> Option<FailureKind> {
        self.inner.lock().last_failure
    }

    /// The parent the caller's sessions report into.
    pub fn progress(&self) -> &ProgressParent {
        &self.inner.progress
    }
}

/// A fetch in flight, consumed step by step.
///
/// Dropping it before the end aborts the fetch and frees the caller.
#[derive(Debug)]
pub struct FetchSteps {
    session: FetchSession,
    caller: Arc<CallerInner>,
    landed: bool,
}

impl FetchSteps {
    /// The next step, or `None` after [`Step::Done`] was yielded.
    pub async fn next(&mut self) -> Option<Step> {
        if self.landed {
            return None;
        }
        let step = self.session.step().await;
        if let Step::Done(outcome) = &step {
            self.land(outcome);
        }
        Some(step)
    }

    /// Drive the rest of the fetch and return its outcome.
    pub async fn finish(mut self) -> FetchOutcome {
        let outcome = self.session.run().await;
        self.land(&outcome);
        outcome
    }

    /// The steps as a stream ending after [`Step::Done`].
    pub fn into_stream(self) -> impl Stream<Item = Step> {
        stream::unfold(self, |mut steps| async move {
            let step = steps.next().await?;
            Some((step, steps))
        })
    }

    /// Abort this fetch.
    pub fn abort(&self) {
        self.session.abort();
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// Attempts made so far.
    pub fn attempt_count(&self) -> u32 {
        self.session.attempt_count()
    }

    /// The underlying session.
    pub fn session(&self) -> &FetchSession {
        &self.session
    }

    fn land(&mut self, outcome: &FetchOutcome) {
        if self.landed {
            return;
        }
        self.landed = true;
        self.session.release_progress();
        self.record(outcome.attempts(), outcome.is_success(), outcome.failure_kind());
    }

    fn record(&self, attempts: u32, succeeded: bool, failure: Option<FailureKind>) {
        let mut state = self.caller.lock();
        state.running = false;
        state.abort = None;
        state.last_attempt_count = attempts;
        state.succeeded = succeeded;
        state.last_failure = failure;
    }
}

impl Drop for FetchSteps {
    fn drop(&mut self) {
        if self.landed {
            return;
        }
        info!(attempts = self.session.attempt_count(), "fetch abandoned before completion");
        self.session.abort_handle().abort();
        self.record(
            self.session.attempt_count(),
            false,
            Some(FailureKind::UserAbort),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SharedProgress;
    use crate::testing::ScriptedTransport;
    use futures::StreamExt;
    use tracing_test::traced_test;

    fn request() -> FetchRequest {
        FetchRequest::get("https://example.com/sheet")
    }

    fn untimed() -> RetryWaitParams {
        RetryWaitParams::default().with_loading_timeout_ms(0)
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_second_start_is_rejected() {
        let caller = FetchCaller::new(
            Arc::new(ScriptedTransport::new().hang()),
            ProgressParent::detached(),
        );
        let steps = caller.start_as_sequence(request(), untimed()).unwrap();

        let second = caller.start_as_sequence(request(), untimed());
        assert_eq!(second.err(), Some(FetchError::AlreadyRunning));
        assert!(logs_contain("already in flight"));

        drop(steps);
        assert!(!caller.is_running());
        assert_eq!(caller.last_failure(), Some(FailureKind::UserAbort));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_params_leave_caller_free() {
        let caller = FetchCaller::new(Arc::new(ScriptedTransport::new()), ProgressParent::detached());
        let params = RetryWaitParams::default().with_retry_backoff_exponent_max(99);

        let result = caller.start_as_promise(request(), params).await;
        assert!(matches!(result, Err(FetchError::InvalidConfig(_))));
        assert!(!caller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_fetches_do_not_leak_nodes() {
        let shared = SharedProgress::new();
        let transport = ScriptedTransport::new().repeat(
            crate::testing::AttemptScript::new()
                .start()
                .fail_with("reset"),
        );
        let caller = FetchCaller::new(Arc::new(transport), shared.new_root());
        let params = untimed().with_retry_times_max(2);

        for _ in 0..5 {
            let outcome = caller.start_as_promise(request(), params.clone()).await.unwrap();
            assert_eq!(outcome.attempts(), 3);
        }
        assert_eq!(shared.read(|tree| tree.live_count()), 1);
        assert_eq!(caller.last_attempt_count(), 3);
        assert_eq!(caller.last_failure(), Some(FailureKind::TransportError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_after_done() {
        let caller = FetchCaller::new(
            Arc::new(ScriptedTransport::new().respond(200, "ok")),
            ProgressParent::detached(),
        );
        let steps: Vec<Step> = caller
            .start_as_sequence(request(), untimed())
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert!(steps.last().is_some_and(Step::is_done));
        assert_eq!(steps.iter().filter(|s| s.is_done()).count(), 1);
        assert!(caller.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_idle_caller_is_noop() {
        let caller = FetchCaller::new(
            Arc::new(ScriptedTransport::new().respond(200, "ok")),
            ProgressParent::detached(),
        );
        caller.abort();

        let outcome = caller.start_as_promise(request(), untimed()).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_single_flight_guard() {
        let caller = FetchCaller::new(
            Arc::new(ScriptedTransport::new().hang()),
            ProgressParent::detached(),
        );
        let other = caller.clone();
        let mut steps = caller.start_as_sequence(request(), untimed()).unwrap();
        steps.next().await;

        assert!(other.is_running());
        other.abort();
        let outcome = steps.finish().await;
        assert!(outcome.is_aborted());
        assert_eq!(caller.last_attempt_count(), 1);
    }
}
