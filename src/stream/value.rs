//! Single-shot producers for answers known before subscription

use super::{Emitter, Publisher, StreamError, Subscriber, Subscription};
use std::sync::Arc;

/// Subscription for producers that emit synchronously.
///
/// Demand is not tracked, but non-positive demand is still reported.
struct ImmediateSubscription {
    emitter: Emitter,
}

impl Subscription for ImmediateSubscription {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.emitter.error(StreamError::IllegalDemand(n));
        }
    }

    fn cancel(&self) {
        self.emitter.cancel();
    }
}

/// Emits one fixed value, then completes
#[derive(Debug, Clone)]
pub struct ValueProducer {
    value: String,
}

impl ValueProducer {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Publisher for ValueProducer {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let emitter = Emitter::new(subscriber);
        emitter.on_subscribe(Arc::new(ImmediateSubscription {
            emitter: emitter.clone(),
        }));
        emitter.next(self.value.clone());
        emitter.complete();
    }
}

/// Signals a fixed failure straight after subscription
#[derive(Debug, Clone)]
pub struct FailureProducer {
    cause: StreamError,
}

impl FailureProducer {
    pub fn new(cause: StreamError) -> Self {
        Self { cause }
    }
}

impl Publisher for FailureProducer {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let emitter = Emitter::new(subscriber);
        emitter.on_subscribe(Arc::new(ImmediateSubscription {
            emitter: emitter.clone(),
        }));
        emitter.error(self.cause.clone());
        // absorbed by the emitter, the error above is terminal
        emitter.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{Recorder, Signal};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_producer_emits_then_completes() {
        let recorder = Recorder::requesting(1);
        ValueProducer::new("Bonjour").subscribe(recorder.clone());

        assert_eq!(
            recorder.signals(),
            vec![Signal::Next("Bonjour".to_string()), Signal::Complete]
        );
    }

    #[test]
    fn test_value_producer_rejects_zero_demand() {
        let recorder = Recorder::requesting(0);
        ValueProducer::new("ignored").subscribe(recorder.clone());

        assert_eq!(
            recorder.signals(),
            vec![Signal::Error(StreamError::IllegalDemand(0))]
        );
    }

    #[test]
    fn test_value_producer_cancelled_in_subscribe_emits_nothing() {
        let recorder = Recorder::passive();

        struct Canceller {
            inner: Arc<Recorder>,
        }
        impl Subscriber for Canceller {
            fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
                subscription.cancel();
            }
            fn on_next(&self, item: String) {
                self.inner.on_next(item);
            }
            fn on_error(&self, error: StreamError) {
                self.inner.on_error(error);
            }
            fn on_complete(&self) {
                self.inner.on_complete();
            }
        }
        ValueProducer::new("x").subscribe(Arc::new(Canceller {
            inner: recorder.clone(),
        }));
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn test_failure_producer_signals_single_terminal() {
        let recorder = Recorder::requesting(i64::MAX);
        let cause = StreamError::transport(None, "connection refused");
        FailureProducer::new(cause.clone()).subscribe(recorder.clone());

        assert_eq!(recorder.signals(), vec![Signal::Error(cause)]);
    }
}
