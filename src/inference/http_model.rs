//! Vision model backed by an upstream HTTP model worker

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::inference::model::{
    png_data_url, CaptionLength, CaptionOutput, InputFormat, ModelInput, QueryOutput, VisionModel,
};
use crate::middleware::auth::AUTH_HEADER;

/// Model worker speaking the `/v1/caption` and `/v1/query` JSON API
pub struct HttpVisionModel {
    name: String,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CaptionCall<'a> {
    image_url: &'a str,
    length: CaptionLength,
}

#[derive(Debug, Serialize)]
struct QueryCall<'a> {
    image_url: &'a str,
    question: &'a str,
}

impl HttpVisionModel {
    /// Create a new HTTP model from configuration
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    /// The pool normally prepared the URL; encode here only for bare bitmaps.
    fn data_url(input: &ModelInput) -> Result<Cow<'_, str>> {
        match input.data_url() {
            Some(url) => Ok(Cow::Borrowed(url)),
            None => png_data_url(input.image()).map(Cow::Owned),
        }
    }

    async fn call<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        debug!(model = %self.name, url = %url, "Sending inference request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(AUTH_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Inference(format!("Model worker unreachable at {}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Inference(format!(
                "Model worker returned {}: {}",
                status, body
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AppError::Inference(format!("Failed to parse model response: {}", e)))
    }
}

#[async_trait]
impl VisionModel for HttpVisionModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_format(&self) -> InputFormat {
        InputFormat::PngDataUrl
    }

    async fn caption(&mut self, input: &ModelInput, length: CaptionLength) -> Result<CaptionOutput> {
        let image_url = Self::data_url(input)?;
        self.call(
            "/v1/caption",
            &CaptionCall {
                image_url: &image_url,
                length,
            },
        )
        .await
    }

    async fn query(&mut self, input: &ModelInput, question: &str) -> Result<QueryOutput> {
        let image_url = Self::data_url(input)?;
        self.call(
            "/v1/query",
            &QueryCall {
                image_url: &image_url,
                question,
            },
        )
        .await
    }
}
