//! Model capability trait and request types

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};
use crate::preprocess::decoder::DecodedImage;

/// Caption length hint accepted by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionLength {
    Short,
    #[default]
    Normal,
    Long,
}

impl CaptionLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionLength::Short => "short",
            CaptionLength::Normal => "normal",
            CaptionLength::Long => "long",
        }
    }

    /// Clamp a request parameter to a known length.
    ///
    /// Unknown or missing values become `Normal`; this never fails.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("short") => CaptionLength::Short,
            Some("long") => CaptionLength::Long,
            _ => CaptionLength::Normal,
        }
    }
}

impl fmt::Display for CaptionLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to ask the model about an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceRequest {
    Caption { length: CaptionLength },
    Query { question: String },
}

impl InferenceRequest {
    pub fn mode(&self) -> &'static str {
        match self {
            InferenceRequest::Caption { .. } => "caption",
            InferenceRequest::Query { .. } => "query",
        }
    }
}

/// Caption produced by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionOutput {
    pub caption: String,
}

/// Answer produced by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub answer: String,
}

/// Image encoding a model wants besides the bitmap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputFormat {
    /// The decoded bitmap only
    #[default]
    Bitmap,
    /// Also a `data:image/png;base64,` URL of the bitmap
    PngDataUrl,
}

/// Decoded image plus any encoding the model asked for.
///
/// Built on the preprocessing pool so the gate only covers the model call.
#[derive(Debug, Clone)]
pub struct ModelInput {
    image: DecodedImage,
    data_url: Option<String>,
}

impl ModelInput {
    /// Encode `image` as `format` requires. CPU-bound.
    pub fn prepare(image: DecodedImage, format: InputFormat) -> Result<Self> {
        let data_url = match format {
            InputFormat::Bitmap => None,
            InputFormat::PngDataUrl => Some(png_data_url(&image)?),
        };
        Ok(Self { image, data_url })
    }

    pub fn image(&self) -> &DecodedImage {
        &self.image
    }

    /// PNG data-URL, present when prepared as [`InputFormat::PngDataUrl`]
    pub fn data_url(&self) -> Option<&str> {
        self.data_url.as_deref()
    }
}

impl From<DecodedImage> for ModelInput {
    fn from(image: DecodedImage) -> Self {
        Self {
            image,
            data_url: None,
        }
    }
}

/// Lossless PNG data-URL of a bitmap
pub fn png_data_url(image: &DecodedImage) -> Result<String> {
    let png = image
        .to_png()
        .map_err(|e| AppError::Internal(format!("Failed to encode image: {}", e)))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// A vision-language model holding exclusive device state.
///
/// Methods take `&mut self`; the only way to reach a model at runtime is
/// through [`InferenceGate`](crate::inference::gate::InferenceGate).
#[async_trait]
pub trait VisionModel: Send {
    /// Model identifier reported by `/health`
    fn name(&self) -> &str;

    /// Encoding prepared on the preprocessing pool before the gate is taken
    fn input_format(&self) -> InputFormat {
        InputFormat::Bitmap
    }

    /// Describe the image
    async fn caption(&mut self, input: &ModelInput, length: CaptionLength) -> Result<CaptionOutput>;

    /// Answer a question about the image
    async fn query(&mut self, input: &ModelInput, question: &str) -> Result<QueryOutput>;
}
