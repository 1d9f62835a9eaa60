//! HTTP transport feeding the stream producers

use crate::stream::{StatusGate, StreamError};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use std::io::{self, Read};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_CHANNEL_CAPACITY: usize = 32;
pub(crate) const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// Shared HTTP client plus the runtime requests are driven on
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    runtime: Handle,
}

impl HttpTransport {
    pub fn new(runtime: Handle) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("quillstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, runtime }
    }

    /// Transport bound to the current runtime
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Send `request` in the background and feed status and body into `gate`.
    ///
    /// Cancelling the gate drops the request and unblocks body reads.
    pub fn exchange(&self, request: RequestBuilder, gate: StatusGate) {
        let cancel = gate.cancellation();
        self.runtime.spawn(async move {
            let sent = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Request cancelled before a response");
                    return;
                }
                sent = request.send() => sent,
            };
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    warn!("Request failed before a response: {}", e);
                    gate.on_failure(map_reqwest_error(e));
                    return;
                }
            };

            let status = response.status().as_u16();
            info!(status, "Response received");
            let (pipe, feeder) = body_pipe(cancel.clone());
            gate.set_body(pipe);
            gate.on_status(status);
            tokio::select! {
                _ = cancel.cancelled() => debug!("Request cancelled while reading the body"),
                _ = pump_body(response, feeder) => {}
            }
        });
    }

    /// Open `request` as an async byte stream.
    ///
    /// Nothing is sent until the stream is first read. A non-success status
    /// surfaces as a read error carrying the API error detail.
    pub fn open_stream(&self, request: RequestBuilder) -> impl AsyncRead + Send + Unpin + 'static {
        let body = futures::stream::once(async move {
            let response = request
                .send()
                .await
                .map_err(|e| io::Error::other(map_reqwest_error(e).to_string()))?;
            let response = check_response_status(response)
                .await
                .map_err(|e| io::Error::other(e.to_string()))?;
            Ok::<_, io::Error>(response.bytes_stream().map_err(io::Error::other))
        })
        .try_flatten();

        StreamReader::new(Box::pin(body))
    }
}

/// Ok for 2xx, otherwise the error detail read from the body
pub(crate) async fn check_response_status(response: Response) -> Result<Response, StreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &extract_error_detail(&body)))
}

/// `API error {status}: {detail}`, or just the status when detail is empty
pub(crate) fn api_error(status: u16, detail: &str) -> StreamError {
    let detail = truncate_error_detail(detail.trim(), MAX_ERROR_DETAIL_CHARS);
    if detail.is_empty() {
        StreamError::transport(Some(status), format!("API error {status}"))
    } else {
        StreamError::transport(Some(status), format!("API error {status}: {detail}"))
    }
}

pub(crate) fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

pub(crate) fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> StreamError {
    let status = e.status().map(|s| s.as_u16());
    if e.is_timeout() {
        StreamError::transport(status, format!("timeout: {e}"))
    } else if e.is_connect() {
        StreamError::transport(status, format!("network: {e}"))
    } else {
        StreamError::transport(status, e.to_string())
    }
}

fn body_pipe(cancel: CancellationToken) -> (BodyPipe, mpsc::Sender<io::Result<Bytes>>) {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    (
        BodyPipe {
            chunks: rx,
            current: Bytes::new(),
            cancel,
        },
        tx,
    )
}

async fn pump_body(response: Response, feeder: mpsc::Sender<io::Result<Bytes>>) {
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(io::Error::other);
        let failed = chunk.is_err();
        if feeder.send(chunk).await.is_err() {
            debug!("Body reader closed, dropping the rest of the response");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Blocking reader over body chunks pumped from the runtime.
///
/// Reads fail with `ConnectionAborted` once `cancel` fires. `Interrupted`
/// would make `BufRead` helpers retry forever.
struct BodyPipe {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    cancel: CancellationToken,
}

impl Read for BodyPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            let cancel = &self.cancel;
            let chunks = &mut self.chunks;
            let next = futures::executor::block_on(async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    chunk = chunks.recv() => Some(chunk),
                }
            });
            match next {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "request cancelled",
                    ))
                }
                Some(Some(Ok(chunk))) => self.current = chunk,
                Some(Some(Err(e))) => return Err(e),
                Some(None) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}
