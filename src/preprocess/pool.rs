//! Fixed-size worker pool for CPU-bound image preprocessing

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::preprocess::decoder::{self, DecodedImage, ImagePayload};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the preprocessing pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of decodes that may run at the same time
    pub workers: usize,
    /// Maximum number of submitted jobs not yet finished; 0 disables the limit
    pub max_pending: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_pending: 1000,
        }
    }
}

/// Worker pool that runs image decodes off the request tasks.
///
/// Jobs are dispatched in submission order to at most `workers` blocking
/// threads at a time. Must be created inside a Tokio runtime.
pub struct PreprocessPool {
    job_tx: mpsc::UnboundedSender<Job>,
    config: PoolConfig,
    pending_count: Arc<AtomicUsize>,
    completed_count: Arc<AtomicU64>,
}

impl PreprocessPool {
    /// Create a new pool with default configuration
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a new pool with custom configuration
    pub fn with_config(config: PoolConfig) -> Self {
        let config = PoolConfig {
            workers: config.workers.max(1),
            ..config
        };
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.workers));

        // Start the dispatcher task
        tokio::spawn(Self::dispatch(job_rx, semaphore));

        Self {
            job_tx,
            config,
            pending_count: Arc::new(AtomicUsize::new(0)),
            completed_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submit an image for decoding
    pub fn submit(&self, payload: ImagePayload) -> Result<PoolTicket<DecodedImage>> {
        self.submit_with(move || decoder::decode(payload).map_err(AppError::from))
    }

    /// Submit an arbitrary blocking job to the pool
    pub fn submit_with<F, T>(&self, job: F) -> Result<PoolTicket<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pending = self.pending_count.fetch_add(1, Ordering::AcqRel);
        if self.config.max_pending > 0 && pending >= self.config.max_pending {
            self.pending_count.fetch_sub(1, Ordering::AcqRel);
            warn!(pending, max_pending = self.config.max_pending, "Preprocessing queue is full");
            return Err(AppError::Overloaded("Preprocessing queue is full".to_string()));
        }

        let (result_tx, result_rx) = oneshot::channel();
        let tracker = PendingGuard {
            pending: self.pending_count.clone(),
            completed: self.completed_count.clone(),
        };

        // Counters settle before the ticket resolves, panics included.
        let wrapped: Job = Box::new(move || {
            let tracker = tracker;
            let result = job();
            drop(tracker);
            let _ = result_tx.send(result);
        });

        self.job_tx
            .send(wrapped)
            .map_err(|_| AppError::Internal("Preprocessing pool is shut down".to_string()))?;

        debug!(pending = pending + 1, "Preprocessing job queued");

        Ok(PoolTicket { result_rx })
    }

    async fn dispatch(mut job_rx: mpsc::UnboundedReceiver<Job>, semaphore: Arc<Semaphore>) {
        while let Some(job) = job_rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // Dropping the job drops its sender; the ticket reports the loss.
                Err(_) => break,
            };

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job();
            });
        }
    }

    /// Number of worker slots
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Jobs submitted and not yet finished, queued or running
    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Jobs finished, successfully or not
    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.config.workers,
            pending: self.pending_count(),
            completed: self.completed_count(),
            max_pending: self.config.max_pending,
        }
    }
}

impl Default for PreprocessPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the counters right even if a job panics.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Future resolving to the result of a pool job
#[must_use = "the job result is lost unless the ticket is awaited"]
pub struct PoolTicket<T> {
    result_rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for PoolTicket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result_rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal(
                "Preprocessing worker dropped the job".to_string(),
            )),
        })
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub workers: usize,
    pub pending: usize,
    pub completed: u64,
    pub max_pending: usize,
}
