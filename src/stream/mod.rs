//! Streaming contract shared by every response producer
//!
//! A [`Publisher`] hands its [`Subscriber`] a [`Subscription`], then delivers
//! zero or more items followed by exactly one of `on_complete`/`on_error`.
//! Cancelling the subscription silences the stream for good.

mod gated;
mod lines;
mod value;

pub use gated::{Decoder, StatusGate, StatusGatedProducer};
pub use lines::{LineStreamProducer, LineTransform};
pub use value::{FailureProducer, ValueProducer};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failure signalled through `on_error`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Demand must be positive (requested {0})")]
    IllegalDemand(i64),

    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("No async runtime available to drive the stream")]
    NoRuntime,
}

impl StreamError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        StreamError::Transport {
            status,
            message: message.into(),
        }
    }

    /// HTTP status attached to the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Human-readable detail, `None` when the failure carries no message.
    pub fn detail(&self) -> Option<String> {
        let message = self.to_string();
        let trimmed = message.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}

/// Flow-control handle between a subscriber and its producer
pub trait Subscription: Send + Sync {
    /// Declare readiness for `n` more items; `n <= 0` is signalled as
    /// [`StreamError::IllegalDemand`].
    fn request(&self, n: i64);

    /// Stop the stream. Safe to call repeatedly and from any thread.
    fn cancel(&self);
}

/// Item sink
pub trait Subscriber: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, item: String);
    fn on_error(&self, error: StreamError);
    fn on_complete(&self);
}

/// Item source
pub trait Publisher: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>);
}

/// Producer-side view of a subscriber.
///
/// Every producer signals through an `Emitter`, which drops anything sent
/// after a terminal signal or after cancellation.
#[derive(Clone)]
pub struct Emitter {
    subscriber: Arc<dyn Subscriber>,
    terminated: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Emitter {
    pub fn new(subscriber: Arc<dyn Subscriber>) -> Self {
        Self {
            subscriber,
            terminated: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.subscriber.on_subscribe(subscription);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once nothing more will reach the subscriber
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.terminated.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver an item. Returns `false` when the stream is already over,
    /// which decode loops use as their stop condition.
    pub fn next(&self, item: String) -> bool {
        if self.is_done() {
            return false;
        }
        self.subscriber.on_next(item);
        true
    }

    pub fn error(&self, error: StreamError) {
        if self.is_cancelled() || self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscriber.on_error(error);
    }

    pub fn complete(&self) {
        if self.is_cancelled() || self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscriber.on_complete();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Recorder, Signal};
    use super::*;

    #[test]
    fn test_emitter_drops_signals_after_terminal() {
        let recorder = Recorder::passive();
        let emitter = Emitter::new(recorder.clone());

        assert!(emitter.next("a".to_string()));
        emitter.complete();
        assert!(!emitter.next("b".to_string()));
        emitter.error(StreamError::Decode("late".to_string()));
        emitter.complete();

        assert_eq!(
            recorder.signals(),
            vec![Signal::Next("a".to_string()), Signal::Complete]
        );
    }

    #[test]
    fn test_emitter_silent_after_cancel() {
        let recorder = Recorder::passive();
        let emitter = Emitter::new(recorder.clone());

        emitter.cancel();
        emitter.cancel();
        assert!(!emitter.next("a".to_string()));
        emitter.error(StreamError::Cancelled);
        emitter.complete();

        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn test_detail_falls_back_to_none_for_empty_message() {
        assert_eq!(StreamError::Io(String::new()).detail(), None);
        assert_eq!(StreamError::transport(Some(500), "  ").detail(), None);
        assert_eq!(
            StreamError::transport(Some(404), "API error 404: not found").detail(),
            Some("API error 404: not found".to_string())
        );
    }
}
