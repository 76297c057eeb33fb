//! Vision-Language Model Serving
//!
//! Serves a single-GPU vision-language model over HTTP. Image decoding runs on
//! a bounded worker pool; every model call passes through one process-wide
//! inference gate.

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod middleware;
pub mod orchestrator;
pub mod preprocess;

pub use error::{AppError, Result};

use std::sync::Arc;

use inference::{gate::InferenceGate, model::VisionModel};
use orchestrator::VisionService;
use preprocess::pool::{PoolConfig, PreprocessPool};

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub service: Arc<VisionService>,
}

impl AppState {
    /// Build the pool, the gate and the orchestrator around `model`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(settings: config::Settings, model: Box<dyn VisionModel>) -> Self {
        let pool = Arc::new(PreprocessPool::with_config(PoolConfig {
            workers: settings.preprocess.workers,
            max_pending: settings.preprocess.max_pending,
        }));
        let gate = Arc::new(InferenceGate::with_timeout(model, settings.gate.acquire_timeout()));
        let service = Arc::new(VisionService::new(
            pool,
            gate,
            settings.model.input_token_estimate,
        ));

        Self {
            settings: Arc::new(settings),
            service,
        }
    }
}
