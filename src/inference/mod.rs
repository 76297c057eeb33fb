//! Inference module - model capability, GPU gate, HTTP-backed model, and metrics

pub mod gate;
pub mod http_model;
pub mod metrics;
pub mod model;

pub use gate::{GateGuard, InferenceGate, Timed};
pub use http_model::HttpVisionModel;
pub use metrics::{calculate_metrics, InferenceMetrics};
pub use model::{
    CaptionLength, CaptionOutput, InferenceRequest, InputFormat, ModelInput, QueryOutput, VisionModel,
};
