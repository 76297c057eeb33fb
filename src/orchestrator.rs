//! Per-request sequencing: decode on the pool, infer behind the gate, measure

use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::inference::gate::{InferenceGate, Timed};
use crate::inference::metrics::{calculate_metrics, count_words, InferenceMetrics};
use crate::inference::model::{CaptionLength, InferenceRequest, ModelInput};
use crate::preprocess::decoder::{self, ImagePayload};
use crate::preprocess::pool::PreprocessPool;

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Decoding,
    Decoded,
    GateWait,
    Inferring,
    Done,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPhase::Received => "received",
            RequestPhase::Decoding => "decoding",
            RequestPhase::Decoded => "decoded",
            RequestPhase::GateWait => "gate_wait",
            RequestPhase::Inferring => "inferring",
            RequestPhase::Done => "done",
        }
    }
}

/// Result of a caption request
#[derive(Debug, Clone)]
pub struct CaptionOutcome {
    pub caption: String,
    pub length: CaptionLength,
    pub metrics: InferenceMetrics,
    pub inference_secs: f64,
}

/// Result of a question request
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub request_id: String,
    pub question: String,
    pub answer: String,
    pub inference_secs: f64,
}

/// Result of either request kind
#[derive(Debug, Clone)]
pub enum InferenceOutcome {
    Caption(CaptionOutcome),
    Query(QueryOutcome),
}

/// Request orchestrator shared by every handler
pub struct VisionService {
    pool: Arc<PreprocessPool>,
    gate: Arc<InferenceGate>,
    input_token_estimate: usize,
}

impl VisionService {
    pub fn new(pool: Arc<PreprocessPool>, gate: Arc<InferenceGate>, input_token_estimate: usize) -> Self {
        Self {
            pool,
            gate,
            input_token_estimate,
        }
    }

    pub fn pool(&self) -> &PreprocessPool {
        &self.pool
    }

    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    /// Run a validated request to completion
    pub async fn run(&self, payload: ImagePayload, request: InferenceRequest) -> Result<InferenceOutcome> {
        debug!(mode = request.mode(), "Dispatching request");
        match request {
            InferenceRequest::Caption { length } => {
                self.caption(payload, length).await.map(InferenceOutcome::Caption)
            }
            InferenceRequest::Query { question } => {
                self.query(payload, question).await.map(InferenceOutcome::Query)
            }
        }
    }

    /// Caption an image
    pub async fn caption(&self, payload: ImagePayload, length: CaptionLength) -> Result<CaptionOutcome> {
        trace_phase("caption", RequestPhase::Received);
        let input = self.decode("caption", payload).await?;

        trace_phase("caption", RequestPhase::GateWait);
        let gate = self.gate.clone();
        let timed = join_inference("caption", tokio::spawn(async move { gate.caption(&input, length).await }))
            .await
            .inspect_err(|e| error!(mode = "caption", error = %e, "Inference failed"))?;
        trace_phase("caption", RequestPhase::Done);

        let inference_secs = timed.elapsed_secs();
        let Timed {
            value,
            started_at,
            finished_at,
            ..
        } = timed;
        let metrics = calculate_metrics(
            &[started_at],
            &[finished_at],
            self.input_token_estimate,
            count_words(&value.caption),
        );

        info!(
            mode = "caption",
            length = %length,
            inference_secs,
            output_tokens = metrics.output_tokens,
            "Caption generated"
        );

        Ok(CaptionOutcome {
            caption: value.caption,
            length,
            metrics,
            inference_secs,
        })
    }

    /// Answer a question about an image
    pub async fn query(&self, payload: ImagePayload, question: String) -> Result<QueryOutcome> {
        if question.is_empty() {
            return Err(AppError::InvalidRequest("Missing question parameter".to_string()));
        }

        let request_id = new_query_id();
        trace_phase("query", RequestPhase::Received);
        debug!(request_id = %request_id, payload_bytes = payload.len(), "Submitting image preprocessing");
        let input = self.decode("query", payload).await?;

        trace_phase("query", RequestPhase::GateWait);
        let gate = self.gate.clone();
        let asked = question.clone();
        let timed = join_inference("query", tokio::spawn(async move { gate.query(&input, &asked).await }))
            .await
            .inspect_err(|e| error!(mode = "query", request_id = %request_id, error = %e, "Inference failed"))?;
        trace_phase("query", RequestPhase::Done);

        let inference_secs = timed.elapsed_secs();
        info!(
            mode = "query",
            request_id = %request_id,
            inference_secs,
            question = %question,
            "Answer generated"
        );

        Ok(QueryOutcome {
            request_id,
            question,
            answer: timed.value.answer,
            inference_secs,
        })
    }

    /// Decode and encode for the model on the pool, outside the gate
    async fn decode(&self, mode: &'static str, payload: ImagePayload) -> Result<ModelInput> {
        trace_phase(mode, RequestPhase::Decoding);
        let format = self.gate.input_format();
        let input = self
            .pool
            .submit_with(move || ModelInput::prepare(decoder::decode(payload)?, format))?
            .await?;
        trace_phase(mode, RequestPhase::Decoded);
        let (width, height) = input.image().dimensions();
        debug!(mode, width, height, ?format, "Image preprocessed");
        Ok(input)
    }
}

/// The gated call runs on its own task so a disconnecting client cannot cut
/// an inference short while the next waiter takes the gate.
async fn join_inference<T>(mode: &'static str, handle: tokio::task::JoinHandle<Result<T>>) -> Result<T> {
    trace_phase(mode, RequestPhase::Inferring);
    handle
        .await
        .map_err(|e| AppError::Internal(format!("Inference task failed: {}", e)))?
}

fn trace_phase(mode: &'static str, phase: RequestPhase) {
    debug!(mode, phase = phase.as_str(), "Request phase");
}

/// `query_<YYYY-MM-DD-HH:MM:SS>-<6 hex chars>`
pub fn new_query_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "query_{}-{}",
        chrono::Local::now().format("%Y-%m-%d-%H:%M:%S"),
        &suffix[..6]
    )
}
