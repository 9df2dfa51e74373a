//! One resilient fetch: attempts, backoff waits and their progress.
//!
//! A [`FetchSession`] moves through
//!
//! ```text
//! Idle -> Loading -> (RetryWaiting -> Loading)* -> Done
//! ```
//!
//! and is driven by [`FetchSession::step`]. Each call suspends until
//! something observable happens (a progress change, a phase transition or
//! the end) and returns a [`Step`]. The session owns two progress leaves
//! under the caller's [`ProgressParent`], one per phase; the parent
//! aggregates them.
//!
//! ```rust
//! use resilient_fetch::config::RetryWaitParams;
//! use resilient_fetch::progress::ProgressParent;
//! use resilient_fetch::session::{FetchSession, Step};
//! use resilient_fetch::testing::ScriptedTransport;
//! use resilient_fetch::transport::FetchRequest;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(ScriptedTransport::new().respond(200, "sheet"));
//! let mut session = FetchSession::new(
//!     transport,
//!     FetchRequest::get("https://example.com/sheet"),
//!     RetryWaitParams::default(),
//!     ProgressParent::detached(),
//! )
//! .unwrap();
//!
//! let outcome = loop {
//!     if let Step::Done(outcome) = session.step().await {
//!         break outcome;
//!     }
//! };
//! assert!(outcome.is_success());
//! assert_eq!(outcome.attempts(), 1);
//! # });
//! ```

mod outcome;
mod phase;

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::config::RetryWaitParams;
use crate::error::FetchError;
use crate::progress::{NodeId, ProgressError, ProgressParent, ProgressTree, UNKNOWN_MAX};
use crate::retry::{FailureKind, FetchFailure, RetryDecision, RetryPolicy};
use crate::transport::{EventSender, FetchRequest, FetchResponse, Transport, TransportEvent};

pub use outcome::FetchOutcome;

use phase::{LoadingPhase, LoadingSignal, RetryWaitingPhase, WaitSignal};

/// Headroom added to the loading max when the body length is unknown.
pub const UNKNOWN_LENGTH_HEADROOM: u64 = 64 * 1024;

/// The externally visible state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Not started.
    Idle,
    /// An attempt is in flight.
    Loading,
    /// Waiting out a backoff before the next attempt.
    RetryWaiting,
    /// Terminal.
    Done,
}

/// One observation yielded by [`FetchSession::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Something changed; the session is still running.
    Progress(ProgressReport),
    /// The session ended. Repeated by every later `step`.
    Done(FetchOutcome),
}

impl Step {
    /// Returns true for [`Step::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done(_))
    }
}

/// Progress as seen at one step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ProgressReport {
    /// Top of the progress tree the session reports into.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub root: NodeId,
    /// Completion of `root`, in `[0, 100]`.
    pub root_percentage: f64,
    /// Phase after the step.
    pub phase: Phase,
    /// Attempts made so far.
    pub attempt_count: u32,
}

/// A cloneable handle that aborts one session.
///
/// Aborting is idempotent and sticky; it only takes effect at the
/// session's next suspension point.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Request the abort.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Returns true once an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Loading(LoadingPhase),
    RetryWaiting(RetryWaitingPhase),
    Done(FetchOutcome),
}

enum Signal {
    Begin,
    Loading(LoadingSignal),
    Waiting(WaitSignal),
}

enum Transition {
    Stay,
    Enter(State),
    Finish(Result<FetchResponse, FetchFailure>),
}

/// The state machine of one fetch.
pub struct FetchSession {
    transport: Arc<dyn Transport>,
    request: FetchRequest,
    params: RetryWaitParams,
    policy: RetryPolicy,
    progress: ProgressParent,
    loading_node: Option<NodeId>,
    retry_node: Option<NodeId>,
    attempt_count: u32,
    abort: CancellationToken,
    state: State,
    started: Instant,
    span: Span,
}

impl std::fmt::Debug for FetchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("request", &self.request)
            .field("params", &self.params)
            .field("phase", &self.phase())
            .field("attempt_count", &self.attempt_count)
            .field("loading_node", &self.loading_node)
            .field("retry_node", &self.retry_node)
            .finish_non_exhaustive()
    }
}

impl FetchSession {
    /// Prepare a session. Nothing is sent until the first [`step`](Self::step).
    ///
    /// The loading leaf is attached under `progress` immediately.
    pub fn new(
        transport: Arc<dyn Transport>,
        request: FetchRequest,
        params: RetryWaitParams,
        progress: ProgressParent,
    ) -> Result<Self, FetchError> {
        params.validate()?;
        let loading_node = progress.attach_leaf(UNKNOWN_MAX, 1.0)?;
        let span = tracing::info_span!(
            "fetch",
            method = %request.method(),
            url = %request.url(),
        );

        Ok(Self {
            transport,
            request,
            policy: params.policy(),
            params,
            progress,
            loading_node: Some(loading_node),
            retry_node: None,
            attempt_count: 0,
            abort: CancellationToken::new(),
            state: State::Idle,
            started: Instant::now(),
            span,
        })
    }

    /// Advance until the next observable change.
    ///
    /// Cancel safe: a dropped `step` future leaves the session where it was.
    pub async fn step(&mut self) -> Step {
        let span = self.span.clone();
        self.advance().instrument(span).await
    }

    /// Drive the session to completion.
    pub async fn run(&mut self) -> FetchOutcome {
        loop {
            if let Step::Done(outcome) = self.step().await {
                return outcome;
            }
        }
    }

    /// Request an abort, observed at the next suspension point.
    pub fn abort(&self) {
        if !self.abort.is_cancelled() && !matches!(self.state, State::Done(_)) {
            self.span.in_scope(|| info!(phase = ?self.phase(), "abort requested"));
        }
        self.abort.cancel();
    }

    /// A handle that can abort the session from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.abort.clone(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Loading(_) => Phase::Loading,
            State::RetryWaiting(_) => Phase::RetryWaiting,
            State::Done(_) => Phase::Done,
        }
    }

    /// Attempts made so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The request every attempt sends.
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// The session's configuration.
    pub fn params(&self) -> &RetryWaitParams {
        &self.params
    }

    /// The parent the session reports into.
    pub fn progress(&self) -> &ProgressParent {
        &self.progress
    }

    /// The loading leaf, until progress is released.
    pub fn loading_node(&self) -> Option<NodeId> {
        self.loading_node
    }

    /// The retry-wait leaf, while one exists.
    ///
    /// Created at the first backoff wait and released once retries are
    /// exhausted.
    pub fn retry_waiting_node(&self) -> Option<NodeId> {
        self.retry_node
    }

    /// The outcome, once the session is done.
    pub fn outcome(&self) -> Option<&FetchOutcome> {
        match &self.state {
            State::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Release the session's progress leaves. Idempotent.
    pub fn release_progress(&mut self) {
        let nodes = [self.loading_node.take(), self.retry_node.take()];
        self.progress.tree().write(|tree| {
            for node in nodes.into_iter().flatten() {
                if let Err(e) = tree.release(node) {
                    debug!(%node, error = %e, "progress leaf already gone");
                }
            }
        });
    }

    async fn advance(&mut self) -> Step {
        let signal = match &mut self.state {
            State::Done(outcome) => return Step::Done(outcome.clone()),
            State::Idle => Signal::Begin,
            State::Loading(loading) => Signal::Loading(loading.next_signal(&self.abort).await),
            State::RetryWaiting(waiting) => {
                Signal::Waiting(waiting.next_signal(&self.abort).await)
            }
        };

        let transition = match signal {
            Signal::Begin if self.abort.is_cancelled() => {
                self.complete_node(self.loading_node);
                Transition::Finish(Err(FetchFailure::aborted()))
            }
            Signal::Begin => Transition::Enter(self.begin_loading()),
            Signal::Loading(signal) => self.on_loading(signal),
            Signal::Waiting(signal) => self.on_waiting(signal),
        };

        match transition {
            Transition::Stay => Step::Progress(self.report()),
            Transition::Enter(state) => {
                self.state = state;
                Step::Progress(self.report())
            }
            Transition::Finish(result) => Step::Done(self.finish(result)),
        }
    }

    fn on_loading(&mut self, signal: LoadingSignal) -> Transition {
        match signal {
            LoadingSignal::Abort => {
                self.complete_node(self.loading_node);
                Transition::Finish(Err(FetchFailure::aborted()))
            }
            LoadingSignal::Tick => {
                let tick = self.params.loading_tick_interval_ms as f64;
                self.update_node(self.loading_node, |tree, id| tree.advance(id, tick));
                Transition::Stay
            }
            LoadingSignal::Deadline => {
                let failure = FetchFailure::new(FailureKind::Timeout).with_message(format!(
                    "no response within {} ms",
                    self.params.loading_timeout_ms
                ));
                self.end_attempt(Err(failure))
            }
            LoadingSignal::Event(None) => {
                let failure = FetchFailure::new(FailureKind::UnknownError)
                    .with_message("transport went away without a terminal event");
                self.end_attempt(Err(failure))
            }
            LoadingSignal::Event(Some(event)) => self.on_transport_event(event),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Transition {
        // With a loading timer the bar follows time, not bytes.
        let timer_driven = self.params.loading_timeout().is_some();
        match event {
            TransportEvent::Start => {
                if !timer_driven {
                    self.update_node(self.loading_node, |tree, id| {
                        tree.set_value_and_max(id, 0.0, UNKNOWN_MAX)
                    });
                }
                Transition::Stay
            }
            TransportEvent::Progress {
                loaded,
                total,
                length_computable,
            } => {
                if !timer_driven {
                    let max = if length_computable {
                        total
                    } else {
                        loaded.saturating_add(UNKNOWN_LENGTH_HEADROOM)
                    };
                    self.update_node(self.loading_node, |tree, id| {
                        tree.set_value_and_max(id, loaded as f64, max as f64)
                    });
                }
                Transition::Stay
            }
            TransportEvent::Success(response) if response.is_success() => {
                self.end_attempt(Ok(response))
            }
            other => {
                let failure = other
                    .failure()
                    .unwrap_or_else(|| FetchFailure::new(FailureKind::UnknownError));
                self.end_attempt(Err(failure))
            }
        }
    }

    fn on_waiting(&mut self, signal: WaitSignal) -> Transition {
        match signal {
            WaitSignal::Abort => {
                self.complete_node(self.retry_node);
                Transition::Finish(Err(FetchFailure::aborted()))
            }
            WaitSignal::Tick => {
                let tick = self.params.retry_tick_interval_ms as f64;
                self.update_node(self.retry_node, |tree, id| tree.advance(id, tick));
                Transition::Stay
            }
            WaitSignal::Elapsed => {
                self.complete_node(self.retry_node);
                Transition::Enter(self.begin_loading())
            }
        }
    }

    fn begin_loading(&mut self) -> State {
        self.attempt_count += 1;
        let timeout = self.params.loading_timeout();
        let max = timeout.map_or(UNKNOWN_MAX, |t| t.as_millis() as f64);
        self.update_node(self.loading_node, |tree, id| {
            tree.set_value_and_max(id, 0.0, max)
        });

        debug!(attempt = self.attempt_count, "loading");
        let (events, receiver) = EventSender::channel();
        let attempt = self.abort.child_token();
        self.transport
            .begin(&self.request, events, attempt.clone());

        State::Loading(LoadingPhase::new(
            receiver,
            attempt,
            timeout,
            self.params.loading_tick_interval(),
        ))
    }

    fn end_attempt(&mut self, result: Result<FetchResponse, FetchFailure>) -> Transition {
        self.complete_node(self.loading_node);
        let failure = match result {
            Ok(response) => return Transition::Finish(Ok(response)),
            Err(failure) => failure,
        };

        // An abort that raced the transport's own failure wins.
        if self.abort.is_cancelled() {
            return Transition::Finish(Err(FetchFailure::aborted()));
        }

        let retries_so_far = self.attempt_count.saturating_sub(1);
        match failure.kind().classify() {
            RetryDecision::RetryIfAllowed if self.policy.is_attempt_allowed(retries_so_far) => {
                let wait = self.policy.backoff_wait(retries_so_far);
                info!(
                    attempt = self.attempt_count,
                    wait_ms = wait.as_millis() as u64,
                    kind = %failure.kind(),
                    "attempt failed, retrying",
                );
                Transition::Enter(self.begin_retry_wait(wait))
            }
            RetryDecision::RetryIfAllowed | RetryDecision::NeverRetry => {
                Transition::Finish(Err(failure))
            }
        }
    }

    fn begin_retry_wait(&mut self, wait: std::time::Duration) -> State {
        let wait_ms = wait.as_millis() as f64;
        match self.retry_node {
            Some(_) => {
                self.update_node(self.retry_node, |tree, id| {
                    tree.set_value_and_max(id, 0.0, wait_ms)
                });
            }
            None => match self.progress.attach_leaf(wait_ms, 1.0) {
                Ok(node) => self.retry_node = Some(node),
                Err(e) => warn!(error = %e, "could not attach retry-wait progress"),
            },
        }

        debug!(wait_ms = wait_ms as u64, "retry waiting");
        State::RetryWaiting(RetryWaitingPhase::new(
            wait,
            self.params.retry_tick_interval(),
        ))
    }

    fn finish(&mut self, result: Result<FetchResponse, FetchFailure>) -> FetchOutcome {
        match &result {
            Ok(response) => {
                debug!(attempts = self.attempt_count, status = response.status(), "fetch succeeded")
            }
            Err(failure) if failure.kind() == FailureKind::UserAbort => {
                info!(attempts = self.attempt_count, "fetch aborted")
            }
            Err(failure) => {
                warn!(
                    attempts = self.attempt_count,
                    kind = %failure.kind(),
                    error = %failure,
                    "fetch failed",
                );
                // No more waits are coming.
                if let Some(node) = self.retry_node.take() {
                    if let Err(e) = self.progress.tree().write(|tree| tree.release(node)) {
                        debug!(%node, error = %e, "retry-wait leaf already gone");
                    }
                }
            }
        }

        let outcome = FetchOutcome::new(result, self.attempt_count, self.started.elapsed());
        self.state = State::Done(outcome.clone());
        outcome
    }

    fn report(&self) -> ProgressReport {
        let parent = self.progress.node();
        let (root, root_percentage) = self
            .progress
            .tree()
            .read(|tree| {
                let root = tree.root(parent)?;
                Ok::<_, ProgressError>((root, tree.percentage(root)?))
            })
            .unwrap_or((parent, 0.0));

        ProgressReport {
            root,
            root_percentage,
            phase: self.phase(),
            attempt_count: self.attempt_count,
        }
    }

    fn complete_node(&self, node: Option<NodeId>) {
        self.update_node(node, ProgressTree::set_value_to_max);
    }

    fn update_node(
        &self,
        node: Option<NodeId>,
        f: impl FnOnce(&mut ProgressTree, NodeId) -> Result<(), ProgressError>,
    ) {
        let Some(node) = node else { return };
        if let Err(e) = self.progress.tree().write(|tree| f(tree, node)) {
            warn!(%node, error = %e, "progress update failed");
        }
    }
}

impl Drop for FetchSession {
    fn drop(&mut self) {
        self.release_progress();
    }
}
