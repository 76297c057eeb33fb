//! Process-wide mutual exclusion around the model capability

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::inference::metrics::now_secs;
use crate::inference::model::{
    CaptionLength, CaptionOutput, InputFormat, ModelInput, QueryOutput, VisionModel,
};

/// A gated result with the timestamps taken just before and after the call.
///
/// `finished_at` is `started_at` plus the monotonic elapsed time, so a wall
/// clock adjustment during the call cannot skew the difference.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    /// Seconds since the Unix epoch
    pub started_at: f64,
    /// Seconds since the Unix epoch
    pub finished_at: f64,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    fn new(value: T, started_at: f64, elapsed: Duration) -> Self {
        Self {
            value,
            started_at,
            finished_at: started_at + elapsed.as_secs_f64(),
            elapsed,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Serializes every call into the model.
///
/// The model lives inside the gate, so captioning and querying exclude each
/// other as well as themselves. Admission order among waiters is unspecified.
pub struct InferenceGate {
    model: Mutex<Box<dyn VisionModel>>,
    model_name: String,
    input_format: InputFormat,
    acquire_timeout: Option<Duration>,
    waiting: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl InferenceGate {
    /// Create a gate that waits for the model indefinitely
    pub fn new(model: Box<dyn VisionModel>) -> Self {
        Self::with_timeout(model, None)
    }

    /// Create a gate whose acquisition fails after `acquire_timeout`
    pub fn with_timeout(model: Box<dyn VisionModel>, acquire_timeout: Option<Duration>) -> Self {
        let model_name = model.name().to_string();
        let input_format = model.input_format();
        Self {
            model: Mutex::new(model),
            model_name,
            input_format,
            acquire_timeout,
            waiting: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// What the preprocessing pool must prepare for this model
    pub fn input_format(&self) -> InputFormat {
        self.input_format
    }

    /// Take exclusive ownership of the model
    pub async fn acquire(&self) -> Result<GateGuard<'_>> {
        let waiting = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(waiting, "Waiting for inference gate");
        let requested_at = Instant::now();

        let guard = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.model.lock()).await,
            None => Ok(self.model.lock().await),
        };
        self.waiting.fetch_sub(1, Ordering::AcqRel);

        match guard {
            Ok(model) => {
                debug!(
                    wait_ms = requested_at.elapsed().as_millis() as u64,
                    "Inference gate acquired"
                );
                Ok(GateGuard { model })
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.acquire_timeout.map(|t| t.as_millis() as u64),
                    "Timed out waiting for inference gate"
                );
                Err(AppError::Overloaded(
                    "Timed out waiting for the model to become available".to_string(),
                ))
            }
        }
    }

    /// Caption an image while holding the gate
    pub async fn caption(
        &self,
        input: &ModelInput,
        length: CaptionLength,
    ) -> Result<Timed<CaptionOutput>> {
        let mut model = self.acquire().await?;
        let started_at = now_secs();
        let clock = Instant::now();
        let result = model.caption(input, length).await;
        let elapsed = clock.elapsed();
        drop(model);

        self.finish(result, started_at, elapsed)
    }

    /// Answer a question about an image while holding the gate
    pub async fn query(&self, input: &ModelInput, question: &str) -> Result<Timed<QueryOutput>> {
        let mut model = self.acquire().await?;
        let started_at = now_secs();
        let clock = Instant::now();
        let result = model.query(input, question).await;
        let elapsed = clock.elapsed();
        drop(model);

        self.finish(result, started_at, elapsed)
    }

    fn finish<T>(&self, result: Result<T>, started_at: f64, elapsed: Duration) -> Result<Timed<T>> {
        match result {
            Ok(value) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(Timed::new(value, started_at, elapsed))
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(match e {
                    AppError::Inference(_) => e,
                    other => AppError::Inference(other.to_string()),
                })
            }
        }
    }

    /// Requests currently blocked on the gate
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Exclusive access to the model; the gate reopens on drop
pub struct GateGuard<'a> {
    model: MutexGuard<'a, Box<dyn VisionModel>>,
}

impl Deref for GateGuard<'_> {
    type Target = dyn VisionModel;

    fn deref(&self) -> &Self::Target {
        &**self.model
    }
}

impl DerefMut for GateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.model
    }
}
