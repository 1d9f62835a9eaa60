//! Producer gated on an HTTP status code
//!
//! The network side feeds a [`StatusGate`] with the status code and the
//! response body. The first positive `request` blocks the calling thread
//! until the status arrives, then runs the success decoder for 200 or the
//! error decoder for anything else over the body.

use super::{Emitter, Publisher, StreamError, Subscriber, Subscription};
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Response body as handed over by the transport
pub type Body = Box<dyn Read + Send>;

/// Turns a response body into items.
///
/// Decoders should stop once [`Emitter::next`] returns `false`. Returning
/// an error makes the producer signal it instead of completing.
pub type Decoder =
    Box<dyn FnOnce(u16, &mut dyn BufRead, &Emitter) -> Result<(), StreamError> + Send>;

type StatusSender = oneshot::Sender<Result<u16, StreamError>>;

/// Feeding side of a status-gated exchange
#[derive(Clone)]
pub struct StatusGate {
    status: Arc<Mutex<Option<StatusSender>>>,
    body: Arc<Mutex<Option<oneshot::Sender<Body>>>>,
    cancel: CancellationToken,
}

impl StatusGate {
    /// Cancelled when the subscriber cancels; body readers built by the
    /// feeding side should stop blocking once it fires.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn on_status(&self, code: u16) {
        self.resolve(Ok(code));
    }

    /// The request failed before any status code was received
    pub fn on_failure(&self, error: StreamError) {
        self.resolve(Err(error));
    }

    pub fn set_body<R: Read + Send + 'static>(&self, body: R) {
        let sender = self.body.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(sender) => {
                if sender.send(Box::new(body)).is_err() {
                    debug!("Body arrived after the subscriber went away");
                }
            }
            None => warn!("Response body set twice, ignoring"),
        }
    }

    fn resolve(&self, outcome: Result<u16, StreamError>) {
        let sender = self.status.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    debug!("Status arrived after the subscriber went away");
                }
            }
            None => warn!("Status already resolved, ignoring {:?}", outcome),
        }
    }
}

struct Exchange {
    status: oneshot::Receiver<Result<u16, StreamError>>,
    body: oneshot::Receiver<Body>,
    on_success: Decoder,
    on_error: Decoder,
}

/// Producer whose output depends on the status code of a single exchange
pub struct StatusGatedProducer {
    gate: StatusGate,
    exchange: Mutex<Option<Exchange>>,
}

impl StatusGatedProducer {
    pub fn new<S, E>(on_success: S, on_error: E) -> Self
    where
        S: FnOnce(u16, &mut dyn BufRead, &Emitter) -> Result<(), StreamError> + Send + 'static,
        E: FnOnce(u16, &mut dyn BufRead, &Emitter) -> Result<(), StreamError> + Send + 'static,
    {
        let (status_tx, status_rx) = oneshot::channel();
        let (body_tx, body_rx) = oneshot::channel();
        Self {
            gate: StatusGate {
                status: Arc::new(Mutex::new(Some(status_tx))),
                body: Arc::new(Mutex::new(Some(body_tx))),
                cancel: CancellationToken::new(),
            },
            exchange: Mutex::new(Some(Exchange {
                status: status_rx,
                body: body_rx,
                on_success: Box::new(on_success),
                on_error: Box::new(on_error),
            })),
        }
    }

    pub fn gate(&self) -> StatusGate {
        self.gate.clone()
    }
}

impl Publisher for StatusGatedProducer {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let emitter = Emitter::new(subscriber);
        let exchange = self
            .exchange
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let available = exchange.is_some();

        // Only the subscriber owning the exchange may stop its body.
        let body_cancel = if available {
            self.gate.cancellation()
        } else {
            CancellationToken::new()
        };
        emitter.on_subscribe(Arc::new(GatedSubscription {
            emitter: emitter.clone(),
            exchange: Mutex::new(exchange),
            body_cancel,
        }));

        if !available {
            emitter.error(StreamError::Io(
                "Exchange already consumed by another subscriber".to_string(),
            ));
        }
    }
}

struct GatedSubscription {
    emitter: Emitter,
    exchange: Mutex<Option<Exchange>>,
    body_cancel: CancellationToken,
}

impl Subscription for GatedSubscription {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.emitter.error(StreamError::IllegalDemand(n));
            return;
        }
        let exchange = self
            .exchange
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        // Later requests while draining need no action.
        if let Some(exchange) = exchange {
            self.drain(exchange);
        }
    }

    fn cancel(&self) {
        self.emitter.cancel();
        self.body_cancel.cancel();
    }
}

impl GatedSubscription {
    fn drain(&self, exchange: Exchange) {
        debug!("Waiting for status code");
        let code = match wait_or_cancel(exchange.status, self.emitter.token()) {
            None => return,
            Some(Ok(Ok(code))) => code,
            Some(Ok(Err(e))) => {
                self.emitter.error(e);
                return;
            }
            Some(Err(_)) => {
                self.emitter.error(StreamError::transport(
                    None,
                    "Connection closed before a status code arrived",
                ));
                return;
            }
        };
        debug!(status = code, "Status code received");

        let body = match wait_or_cancel(exchange.body, self.emitter.token()) {
            None => return,
            Some(Ok(body)) => body,
            Some(Err(_)) => {
                self.emitter.error(StreamError::transport(
                    Some(code),
                    format!("API error {}: response body unavailable", code),
                ));
                return;
            }
        };

        let decoder = if code == 200 {
            exchange.on_success
        } else {
            exchange.on_error
        };

        let mut reader = BufReader::new(body);
        let outcome = decoder(code, &mut reader, &self.emitter);
        drop(reader);

        match outcome {
            Ok(()) => self.emitter.complete(),
            Err(e) => self.emitter.error(e),
        }
    }
}

/// Blocks the current thread until `rx` resolves or `token` is cancelled.
fn wait_or_cancel<T>(
    rx: oneshot::Receiver<T>,
    token: &CancellationToken,
) -> Option<Result<T, oneshot::error::RecvError>> {
    futures::executor::block_on(async {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            received = rx => Some(received),
        }
    })
}
