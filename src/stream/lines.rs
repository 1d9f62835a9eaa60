//! Line-by-line producer over an async byte source

use super::{Emitter, Publisher, StreamError, Subscriber, Subscription};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Maps each raw line to the item handed to the subscriber
pub type LineTransform = Arc<dyn Fn(String) -> String + Send + Sync>;

type LineSource = Box<dyn AsyncRead + Send + Unpin>;

/// Emits one item per line of `source`, honouring per-item demand.
///
/// Reading starts on the first positive `request`, in a task on the runtime
/// captured at construction.
pub struct LineStreamProducer {
    source: Mutex<Option<LineSource>>,
    transform: LineTransform,
    runtime: Option<Handle>,
}

impl LineStreamProducer {
    pub fn new<R, F>(source: R, transform: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self {
            source: Mutex::new(Some(Box::new(source))),
            transform: Arc::new(transform),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Identity transform
    pub fn plain<R>(source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(source, |line| line)
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl Publisher for LineStreamProducer {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let emitter = Emitter::new(subscriber);
        let source = self
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let available = source.is_some();

        let subscription = Arc::new(LineSubscription {
            emitter: emitter.clone(),
            demand: Arc::new(Demand::default()),
            pending: Mutex::new(source.map(|source| Pending {
                source,
                transform: self.transform.clone(),
                runtime: self.runtime.clone(),
            })),
            task: Mutex::new(None),
        });
        emitter.on_subscribe(subscription);

        if !available {
            emitter.error(StreamError::Io(
                "Line source already consumed by another subscriber".to_string(),
            ));
        }
    }
}

struct Pending {
    source: LineSource,
    transform: LineTransform,
    runtime: Option<Handle>,
}

struct LineSubscription {
    emitter: Emitter,
    demand: Arc<Demand>,
    pending: Mutex<Option<Pending>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription for LineSubscription {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.emitter.error(StreamError::IllegalDemand(n));
            return;
        }
        if self.emitter.is_done() {
            return;
        }
        self.demand.add(n);

        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(pending) = pending else {
            return;
        };
        let Some(runtime) = pending.runtime else {
            self.emitter.error(StreamError::NoRuntime);
            return;
        };

        let task = runtime.spawn(pump(
            pending.source,
            pending.transform,
            self.demand.clone(),
            self.emitter.clone(),
        ));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn cancel(&self) {
        self.emitter.cancel();
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

async fn pump(
    source: LineSource,
    transform: LineTransform,
    demand: Arc<Demand>,
    emitter: Emitter,
) {
    let mut lines = BufReader::new(source).lines();

    loop {
        tokio::select! {
            biased;
            _ = emitter.cancelled() => {
                debug!("Line stream cancelled");
                return;
            }
            _ = demand.acquire() => {}
        }

        let line = tokio::select! {
            biased;
            _ = emitter.cancelled() => {
                debug!("Line stream cancelled");
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if !emitter.next(transform(line)) {
                    return;
                }
            }
            Ok(None) => {
                emitter.complete();
                return;
            }
            Err(e) => {
                emitter.error(e.into());
                return;
            }
        }
    }
}

/// Outstanding demand; `u64::MAX` stands for unbounded.
#[derive(Default)]
struct Demand {
    outstanding: Mutex<u64>,
    wake: Notify,
}

impl Demand {
    fn add(&self, n: i64) {
        let n = if n == i64::MAX { u64::MAX } else { n as u64 };
        {
            let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
            *outstanding = outstanding.saturating_add(n);
        }
        self.wake.notify_one();
    }

    async fn acquire(&self) {
        loop {
            {
                let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
                if *outstanding > 0 {
                    if *outstanding != u64::MAX {
                        *outstanding -= 1;
                    }
                    return;
                }
            }
            self.wake.notified().await;
        }
    }
}
