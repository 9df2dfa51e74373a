//! The transport contract a fetch session consumes.
//!
//! A [`Transport`] performs the actual byte transfer. The session treats it
//! as a black box: for every attempt it hands over a request, an
//! [`EventSender`] and a cancellation token, and then listens for
//! [`TransportEvent`]s.
//!
//! | Event | Repeatable | Session effect |
//! |---|---|---|
//! | `Start` | no | progress tick when no loading timer is configured |
//! | `Progress` | yes | progress tick when no loading timer is configured |
//! | `Success` | no | success if 2xx, else `HttpStatusNot200` |
//! | `Error` | no | `TransportError` |
//! | `Timeout` | no | `Timeout` |
//! | `Abort` | no | `UserAbort` |
//!
//! A transport must stop work and emit `Abort` once its token is
//! cancelled. Dropping the sender without a terminal event is reported as
//! `UnknownError`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::retry::{FailureKind, FetchFailure};

#[cfg(feature = "reqwest")]
mod http;

#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;

/// Performs one attempt of a request.
///
/// Implementations are expected to spawn their work and return promptly.
pub trait Transport: Send + Sync {
    /// Begin an attempt, reporting through `events` and observing `cancel`.
    fn begin(&self, request: &FetchRequest, events: EventSender, cancel: CancellationToken);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn begin(&self, request: &FetchRequest, events: EventSender, cancel: CancellationToken) {
        (**self).begin(request, events, cancel)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn begin(&self, request: &FetchRequest, events: EventSender, cancel: CancellationToken) {
        (**self).begin(request, events, cancel)
    }
}

/// One event of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The attempt began.
    Start,
    /// Bytes were transferred.
    Progress {
        /// Bytes received so far.
        loaded: u64,
        /// Total bytes, meaningful only when `length_computable`.
        total: u64,
        /// Whether `total` is known.
        length_computable: bool,
    },
    /// The attempt finished with a response, of any status.
    Success(FetchResponse),
    /// Low-level failure.
    Error(String),
    /// The transport's own timeout fired.
    Timeout,
    /// The transport acknowledged a cancellation.
    Abort,
}

impl TransportEvent {
    /// Returns true for events that end the attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Start | TransportEvent::Progress { .. })
    }

    /// The failure this event represents, if it is a terminal failure.
    ///
    /// ```rust
    /// use resilient_fetch::retry::FailureKind;
    /// use resilient_fetch::transport::{FetchResponse, TransportEvent};
    ///
    /// let not_found = TransportEvent::Success(FetchResponse::new(404, "gone"));
    /// assert_eq!(not_found.failure().unwrap().kind(), FailureKind::HttpStatusNot200);
    ///
    /// let ok = TransportEvent::Success(FetchResponse::new(200, "fine"));
    /// assert!(ok.failure().is_none());
    /// ```
    pub fn failure(&self) -> Option<FetchFailure> {
        match self {
            TransportEvent::Start | TransportEvent::Progress { .. } => None,
            TransportEvent::Success(response) if response.is_success() => None,
            TransportEvent::Success(response) => Some(FetchFailure::http_status(response.status)),
            TransportEvent::Error(message) => {
                Some(FetchFailure::new(FailureKind::TransportError).with_message(message.clone()))
            }
            TransportEvent::Timeout => Some(FetchFailure::new(FailureKind::Timeout)),
            TransportEvent::Abort => Some(FetchFailure::aborted()),
        }
    }
}

/// The sending half an attempt reports through.
///
/// Sends never fail loudly: once the session has moved on, events are
/// dropped and the helpers return `false`.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

/// The receiving half, owned by the session's loading phase.
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

impl EventSender {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send any event.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Send `Start`.
    pub fn start(&self) -> bool {
        self.emit(TransportEvent::Start)
    }

    /// Send `Progress`.
    pub fn progress(&self, loaded: u64, total: u64, length_computable: bool) -> bool {
        self.emit(TransportEvent::Progress {
            loaded,
            total,
            length_computable,
        })
    }

    /// Send `Success`.
    pub fn success(&self, response: FetchResponse) -> bool {
        self.emit(TransportEvent::Success(response))
    }

    /// Send `Error`.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Send `Timeout`.
    pub fn timeout(&self) -> bool {
        self.emit(TransportEvent::Timeout)
    }

    /// Send `Abort`.
    pub fn abort(&self) -> bool {
        self.emit(TransportEvent::Abort)
    }

    /// Returns true once the session stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// HTTP-style method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Download, e.g. a weight spreadsheet.
    #[default]
    Get,
    /// Upload, e.g. a match record or telemetry.
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// A request, identical across all attempts of a session.
///
/// ```rust
/// use resilient_fetch::transport::{FetchRequest, Method};
///
/// let request = FetchRequest::post("https://example.com/records", r#"{"w":1}"#)
///     .header("content-type", "application/json");
///
/// assert_eq!(request.method(), Method::Post);
/// assert_eq!(request.headers().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl FetchRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A `POST` request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The body, for `POST`.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// A completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    status: u16,
    body: Bytes,
}

impl FetchResponse {
    /// Build a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns true for `200..=299`.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// The payload.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Take the payload.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        assert_eq!(TransportEvent::Start.failure(), None);
        assert_eq!(
            TransportEvent::Error("reset".into()).failure().map(|f| f.kind()),
            Some(FailureKind::TransportError)
        );
        assert_eq!(
            TransportEvent::Timeout.failure().map(|f| f.kind()),
            Some(FailureKind::Timeout)
        );
        assert_eq!(
            TransportEvent::Abort.failure().map(|f| f.kind()),
            Some(FailureKind::UserAbort)
        );
        let redirect = TransportEvent::Success(FetchResponse::new(302, ""));
        assert_eq!(redirect.failure().and_then(|f| f.status()), Some(302));
        let created = TransportEvent::Success(FetchResponse::new(201, ""));
        assert_eq!(created.failure(), None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(!TransportEvent::Start.is_terminal());
        assert!(!TransportEvent::Progress {
            loaded: 1,
            total: 2,
            length_computable: true
        }
        .is_terminal());
        assert!(TransportEvent::Timeout.is_terminal());
        assert!(TransportEvent::Success(FetchResponse::new(500, "")).is_terminal());
    }

    #[test]
    fn test_sender_reports_closed_receiver() {
        let (events, rx) = EventSender::channel();
        assert!(events.start());
        drop(rx);
        assert!(events.is_closed());
        assert!(!events.abort());
    }

    #[test]
    fn test_request_builders() {
        let get = FetchRequest::get("https://example.com/sheet");
        assert_eq!(get.method(), Method::Get);
        assert_eq!(get.body(), None);
        assert_eq!(get.method().to_string(), "GET");

        let post = FetchRequest::post("https://example.com/log", "payload").header("x-id", "7");
        assert_eq!(post.body().map(|b| &b[..]), Some(&b"payload"[..]));
        assert_eq!(post.headers()[0], ("x-id".to_string(), "7".to_string()));
    }
}
