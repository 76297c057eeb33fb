//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inference::metrics::InferenceMetrics;
use crate::inference::model::CaptionLength;

/// `POST /v1/caption` body
#[derive(Debug, Default, Deserialize)]
pub struct CaptionRequest {
    #[serde(default)]
    pub image_url: Option<String>,
    /// Any JSON value; unknown values fall back to `normal`
    #[serde(default)]
    pub length: Option<Value>,
    /// Accepted and ignored
    #[serde(default)]
    pub stream: Option<Value>,
}

impl CaptionRequest {
    pub fn caption_length(&self) -> CaptionLength {
        CaptionLength::from_param(self.length.as_ref().and_then(Value::as_str))
    }

    pub fn wants_stream(&self) -> bool {
        self.stream.as_ref().and_then(Value::as_bool).unwrap_or(false)
    }
}

/// `POST /v1/query` body
#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
}

/// `POST /v1/caption` response
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
    pub metrics: InferenceMetrics,
    pub finish_reason: String,
}

/// `POST /v1/query` response
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: String,
    pub answer: String,
}

/// `POST /caption` (multipart) response
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadCaptionResponse {
    pub caption: String,
    pub length: CaptionLength,
    pub inference_time: String,
}

/// `POST /identify` (multipart) response
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub question: String,
    pub answer: String,
    pub inference_time: String,
}

/// `GET /health` response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub api_key_enabled: bool,
    pub optimization: OptimizationInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizationInfo {
    pub preprocess_workers: usize,
    pub batch_enabled: bool,
    /// `null` unless batching is enabled
    pub batch_size: Option<usize>,
}

/// Seconds with two decimals, e.g. `1.37s`
pub fn format_inference_time(secs: f64) -> String {
    format!("{:.2}s", secs)
}
