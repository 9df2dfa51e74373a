//! HTTP transport on top of `reqwest`.

use bytes::BytesMut;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{EventSender, FetchRequest, FetchResponse, Method, Transport};

/// A [`Transport`] backed by a `reqwest::Client`.
///
/// Each attempt runs on its own tokio task. The body is streamed so
/// `Progress` events follow the bytes actually received.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Use a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn begin(&self, request: &FetchRequest, events: EventSender, cancel: CancellationToken) {
        let client = self.client.clone();
        let request = request.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    events.abort();
                }
                _ = run(&client, request, &events) => {}
            }
        });
    }
}

async fn run(client: &reqwest::Client, request: FetchRequest, events: &EventSender) {
    events.start();

    let method = match request.method() {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
    };
    let mut builder = client.request(method, request.url());
    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
        builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return report(events, e),
    };

    let status = response.status().as_u16();
    let total = response.content_length();
    let mut stream = response.bytes_stream();
    let mut body = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                body.extend_from_slice(&chunk);
                let loaded = body.len() as u64;
                events.progress(loaded, total.unwrap_or(0), total.is_some());
            }
            Err(e) => return report(events, e),
        }
    }

    events.success(FetchResponse::new(status, body.freeze()));
}

fn report(events: &EventSender, error: reqwest::Error) {
    if error.is_timeout() {
        events.timeout();
    } else {
        events.error(error.to_string());
    }
}
