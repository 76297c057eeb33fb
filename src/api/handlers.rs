//! HTTP handlers

use axum::{
    body::Bytes,
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::BytesRejection,
        Multipart, State,
    },
    response::Html,
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::types::*;
use crate::error::{AppError, Result};
use crate::inference::model::CaptionLength;
use crate::preprocess::decoder::ImagePayload;
use crate::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Question used by `/identify` when the form has none
pub const DEFAULT_QUESTION: &str = "What's in this image?";

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let settings = &state.settings;
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.service.gate().model_name().to_string(),
        api_key_enabled: settings.auth.enabled(),
        optimization: OptimizationInfo {
            preprocess_workers: state.service.pool().workers(),
            batch_enabled: settings.batch.enabled,
            batch_size: settings.batch.enabled.then_some(settings.batch.size),
        },
    })
}

/// `POST /v1/caption`
pub async fn v1_caption(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<CaptionResponse>> {
    let request: CaptionRequest = parse_json_body(&body?)?;
    let image_url = required(request.image_url.clone(), "image_url")?;
    let length = request.caption_length();
    if request.wants_stream() {
        debug!("Streaming requested but not supported, returning full caption");
    }

    let outcome = state.service.caption(ImagePayload::DataUrl(image_url), length).await?;

    Ok(Json(CaptionResponse {
        caption: outcome.caption,
        metrics: outcome.metrics,
        finish_reason: "stop".to_string(),
    }))
}

/// `POST /v1/query`
pub async fn v1_query(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<QueryResponse>> {
    let request: QueryRequest = parse_json_body(&body?)?;
    let image_url = required(request.image_url, "image_url")?;
    let question = required(request.question, "question")?;

    let outcome = state.service.query(ImagePayload::DataUrl(image_url), question).await?;

    Ok(Json(QueryResponse {
        request_id: outcome.request_id,
        answer: outcome.answer,
    }))
}

/// `POST /caption` with a multipart `file` and optional `length`
pub async fn upload_caption(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadCaptionResponse>> {
    let form = read_upload(multipart?, "length").await?;
    let length = CaptionLength::from_param(form.text.as_deref());

    let outcome = state.service.caption(ImagePayload::Bytes(form.file), length).await?;

    Ok(Json(UploadCaptionResponse {
        caption: outcome.caption,
        length: outcome.length,
        inference_time: format_inference_time(outcome.inference_secs),
    }))
}

/// `POST /identify` with a multipart `file` and optional `question`
pub async fn upload_identify(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<IdentifyResponse>> {
    let form = read_upload(multipart?, "question").await?;
    let question = form
        .text
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string());

    let outcome = state.service.query(ImagePayload::Bytes(form.file), question).await?;

    Ok(Json(IdentifyResponse {
        question: outcome.question,
        answer: outcome.answer,
        inference_time: format_inference_time(outcome.inference_secs),
    }))
}

/// Parse a JSON object body; an empty object, `null` or non-JSON is rejected.
fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| AppError::InvalidRequest("Invalid JSON body".to_string()))?;

    match &value {
        Value::Object(map) if !map.is_empty() => {}
        _ => return Err(AppError::InvalidRequest("Invalid JSON body".to_string())),
    }

    serde_json::from_value(value)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid JSON body: {}", e)))
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("Missing {} parameter", name)))
}

/// Uploaded file plus one optional text field
struct UploadForm {
    file: Vec<u8>,
    text: Option<String>,
}

async fn read_upload(mut multipart: Multipart, text_field: &str) -> Result<UploadForm> {
    let mut file = None;
    let mut text = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => file = Some(read_file(field).await?),
            Some(name) if name == text_field => {
                text = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::InvalidRequest("No file provided".to_string()))?;
    if file.is_empty() {
        return Err(AppError::InvalidRequest("No file selected".to_string()));
    }

    Ok(UploadForm { file, text })
}

async fn read_file(field: Field<'_>) -> Result<Vec<u8>> {
    if field.file_name().is_some_and(str::is_empty) {
        return Err(AppError::InvalidRequest("No file selected".to_string()));
    }
    let bytes = field.bytes().await?;
    Ok(bytes.to_vec())
}
