//! Testing utilities for code built on fetch sessions.
//!
//! [`ScriptedTransport`] replays a queue of [`AttemptScript`]s, one per
//! attempt, and records what the session asked of it. Combine it with
//! `#[tokio::test(start_paused = true)]` so backoff waits and loading
//! deadlines complete instantly.
//!
//! # Examples
//!
//! ```rust
//! use resilient_fetch::testing::{AttemptScript, ScriptedTransport};
//!
//! let transport = ScriptedTransport::new()
//!     .fail_with("connection reset")
//!     .push(AttemptScript::new().start().progress(5, 10, true).respond(200, "ok"));
//!
//! assert_eq!(transport.remaining(), 2);
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use resilient_fetch::prelude::*;
//! use resilient_fetch::testing::ScriptedTransport;
//! use resilient_fetch::{assert_fetch_failed, assert_fetch_success};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let caller = FetchCaller::new(
//!     Arc::new(ScriptedTransport::new().respond(200, "ok").respond(404, "")),
//!     ProgressParent::detached(),
//! );
//! let params = RetryWaitParams::default();
//!
//! let ok = caller
//!     .start_as_promise(FetchRequest::get("https://example.com/a"), params.clone())
//!     .await
//!     .unwrap();
//! assert_fetch_success!(ok);
//!
//! let missing = caller
//!     .start_as_promise(FetchRequest::get("https://example.com/b"), params)
//!     .await
//!     .unwrap();
//! assert_fetch_failed!(missing, FailureKind::HttpStatusNot200);
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::transport::{EventSender, FetchRequest, FetchResponse, Transport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScriptStep {
    Emit(TransportEvent),
    Delay(Duration),
    Hang,
}

/// What a [`ScriptedTransport`] does for one attempt.
///
/// Steps run in order. Events are sent immediately; `delay` pauses on the
/// tokio clock; `hang` keeps the attempt open until it is cancelled. A
/// cancelled attempt emits `Abort` and stops. A script that ends without a
/// terminal event drops its sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptScript {
    steps: Vec<ScriptStep>,
}

impl AttemptScript {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send any event.
    pub fn emit(mut self, event: TransportEvent) -> Self {
        self.steps.push(ScriptStep::Emit(event));
        self
    }

    /// Send `Start`.
    pub fn start(self) -> Self {
        self.emit(TransportEvent::Start)
    }

    /// Send `Progress`.
    pub fn progress(self, loaded: u64, total: u64, length_computable: bool) -> Self {
        self.emit(TransportEvent::Progress {
            loaded,
            total,
            length_computable,
        })
    }

    /// Send `Success` with the given status.
    pub fn respond(self, status: u16, body: impl Into<Bytes>) -> Self {
        self.emit(TransportEvent::Success(FetchResponse::new(status, body)))
    }

    /// Send `Error`.
    pub fn fail_with(self, message: impl Into<String>) -> Self {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Send `Timeout`.
    pub fn time_out(self) -> Self {
        self.emit(TransportEvent::Timeout)
    }

    /// Send `Abort`.
    pub fn abort(self) -> Self {
        self.emit(TransportEvent::Abort)
    }

    /// Pause before the next step.
    pub fn delay(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(duration));
        self
    }

    /// Never finish on its own.
    pub fn hang(mut self) -> Self {
        self.steps.push(ScriptStep::Hang);
        self
    }

    async fn play(self, events: EventSender, cancel: CancellationToken) {
        for step in self.steps {
            match step {
                ScriptStep::Emit(event) => {
                    events.emit(event);
                }
                ScriptStep::Delay(duration) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            events.abort();
                            return;
                        }
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                ScriptStep::Hang => {
                    cancel.cancelled().await;
                    events.abort();
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Recorder {
    scripts: VecDeque<AttemptScript>,
    fallback: Option<AttemptScript>,
    requests: Vec<FetchRequest>,
    tokens: Vec<CancellationToken>,
}

/// A [`Transport`] that replays scripted attempts.
///
/// Clones share the script queue and the recordings. Once the queue is
/// empty, the [`repeat`](Self::repeat) script runs; without one the
/// attempt fails with a transport error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Recorder>>,
}

impl ScriptedTransport {
    /// A transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next unscripted attempt.
    pub fn push(self, script: AttemptScript) -> Self {
        self.lock().scripts.push_back(script);
        self
    }

    /// Queue an attempt that starts and answers with `status`.
    pub fn respond(self, status: u16, body: impl Into<Bytes>) -> Self {
        self.push(AttemptScript::new().start().respond(status, body))
    }

    /// Queue an attempt that fails at the transport level.
    pub fn fail_with(self, message: impl Into<String>) -> Self {
        self.push(AttemptScript::new().start().fail_with(message))
    }

    /// Queue an attempt that reports its own timeout.
    pub fn time_out(self) -> Self {
        self.push(AttemptScript::new().start().time_out())
    }

    /// Queue an attempt that never finishes.
    pub fn hang(self) -> Self {
        self.push(AttemptScript::new().start().hang())
    }

    /// Run `script` whenever the queue is empty.
    pub fn repeat(self, script: AttemptScript) -> Self {
        self.lock().fallback = Some(script);
        self
    }

    /// Attempts begun so far.
    pub fn attempts(&self) -> usize {
        self.lock().requests.len()
    }

    /// Scripts still queued.
    pub fn remaining(&self) -> usize {
        self.lock().scripts.len()
    }

    /// Requests seen, one per attempt.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.lock().requests.clone()
    }

    /// Attempts whose cancellation token has fired.
    pub fn cancelled_attempts(&self) -> usize {
        self.lock()
            .tokens
            .iter()
            .filter(|token| token.is_cancelled())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn begin(&self, request: &FetchRequest, events: EventSender, cancel: CancellationToken) {
        let script = {
            let mut recorder = self.lock();
            recorder.requests.push(request.clone());
            recorder.tokens.push(cancel.clone());
            recorder
                .scripts
                .pop_front()
                .or_else(|| recorder.fallback.clone())
        };
        let script = script
            .unwrap_or_else(|| AttemptScript::new().fail_with("no scripted attempt left"));
        tokio::spawn(script.play(events, cancel));
    }
}

/// Assert that a fetch outcome is a success.
///
/// # Example
///
/// See the [module documentation](crate::testing).
#[macro_export]
macro_rules! assert_fetch_success {
    ($outcome:expr) => {
        match $outcome.result() {
            Ok(_) => {}
            Err(failure) => {
                panic!("Expected success, got failure: {:?}", failure);
            }
        }
    };
}

/// Assert that a fetch outcome failed with the given [`FailureKind`].
///
/// [`FailureKind`]: crate::retry::FailureKind
#[macro_export]
macro_rules! assert_fetch_failed {
    ($outcome:expr, $kind:expr) => {
        match $outcome.result() {
            Err(failure) => {
                assert_eq!(failure.kind(), $kind, "unexpected failure: {:?}", failure);
            }
            Ok(response) => {
                panic!("Expected {:?} failure, got success: {:?}", $kind, response);
            }
        }
    };
}

#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl Arbitrary for crate::retry::FailureKind {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use crate::retry::FailureKind;

        prop_oneof![
            Just(FailureKind::UserAbort),
            Just(FailureKind::TransportError),
            Just(FailureKind::HttpStatusNot200),
            Just(FailureKind::Timeout),
            Just(FailureKind::UnknownError),
        ]
        .boxed()
    }
}
