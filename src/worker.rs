//! Bounded pool of blocking workers for AI requests

use crate::{QuillError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A unit of work; the token is cancelled when the pool is force-stopped.
pub type Job = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// How [`WorkerPool::shutdown`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every queued job finished within the grace period
    Drained,
    /// The grace period ran out and running jobs were told to stop
    Forced,
}

/// Fixed number of blocking workers draining a shared FIFO queue.
///
/// Jobs may block (network waits, decoding); at most `size` run at once.
pub struct WorkerPool {
    queue: async_channel::Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    force_stop: CancellationToken,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, runtime: &Handle) -> Self {
        let size = size.max(1);
        let (queue, jobs) = async_channel::unbounded::<Job>();
        let force_stop = CancellationToken::new();

        let workers = (0..size)
            .map(|id| {
                let jobs = jobs.clone();
                let force_stop = force_stop.clone();
                runtime.spawn_blocking(move || {
                    debug!(worker = id, "Worker started");
                    while let Ok(job) = jobs.recv_blocking() {
                        if force_stop.is_cancelled() {
                            break;
                        }
                        job(&force_stop);
                    }
                    debug!(worker = id, "Worker exited");
                })
            })
            .collect();

        Self {
            queue,
            workers: Mutex::new(workers),
            force_stop,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting for a free worker
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue a job. Fails once shutdown has begun.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        self.queue
            .try_send(Box::new(job))
            .map_err(|_| QuillError::Shutdown("no new jobs accepted".to_string()))
    }

    /// Stop accepting jobs and wait up to `grace` for the queue to drain,
    /// then cancel whatever is still running.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        match tokio::time::timeout(grace, futures::future::join_all(workers)).await {
            Ok(_) => {
                info!("Worker pool drained");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                warn!("Worker pool did not drain within {:?}, forcing stop", grace);
                self.force_stop.cancel();
                ShutdownOutcome::Forced
            }
        }
    }
}
