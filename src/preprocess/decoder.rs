//! Image decoding: data-URLs and raw uploads into canonical RGB bitmaps

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

const DATA_URL_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

const INVALID_DATA_URL: &str =
    "Invalid image_url format. Expected data URL format: data:image/<type>;base64,<data>";

/// Errors raised while turning request input into a bitmap.
///
/// Both variants are caused by the caller's input.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Not a `data:image/<subtype>;base64,<payload>` URL, or the payload is not base64.
    #[error("{0}")]
    InvalidFormat(String),

    /// The codec could not parse the bytes.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Image input as it arrives at the service
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// `image_url` field of the JSON API
    DataUrl(String),
    /// Multipart upload
    Bytes(Vec<u8>),
}

impl ImagePayload {
    /// Size of the payload in bytes, as received
    pub fn len(&self) -> usize {
        match self {
            ImagePayload::DataUrl(url) => url.len(),
            ImagePayload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoded image bytes plus the MIME subtype declared by a data-URL, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    mime_subtype: Option<String>,
}

impl EncodedImage {
    /// Raw upload; the codec sniffs the format.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_subtype: None,
        }
    }

    /// Parse `data:image/<subtype>;base64,<payload>` with strict base64 validation.
    pub fn from_data_url(data_url: &str) -> Result<Self, DecodeError> {
        let rest = data_url
            .strip_prefix(DATA_URL_PREFIX)
            .ok_or_else(|| DecodeError::InvalidFormat(INVALID_DATA_URL.to_string()))?;
        let (subtype, payload) = rest
            .split_once(BASE64_MARKER)
            .ok_or_else(|| DecodeError::InvalidFormat(INVALID_DATA_URL.to_string()))?;

        if !is_valid_subtype(subtype) {
            return Err(DecodeError::InvalidFormat(INVALID_DATA_URL.to_string()));
        }

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| DecodeError::InvalidFormat(format!("Invalid base64 image data: {}", e)))?;

        Ok(Self {
            bytes,
            mime_subtype: Some(subtype.to_ascii_lowercase()),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Subtype from the data-URL header (`png`, `jpeg`, ...), `None` for raw uploads
    pub fn mime_subtype(&self) -> Option<&str> {
        self.mime_subtype.as_deref()
    }
}

fn is_valid_subtype(subtype: &str) -> bool {
    !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
}

/// A fully materialized 8-bit, 3-channel RGB bitmap
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Always 3.
    pub fn channels(&self) -> u8 {
        3
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }

    /// Re-encode as PNG, lossless
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

impl From<RgbImage> for DecodedImage {
    fn from(pixels: RgbImage) -> Self {
        Self { pixels }
    }
}

/// Decode request input into a canonical RGB bitmap.
///
/// Runs on a preprocessing worker, never on the request task.
pub fn decode(payload: ImagePayload) -> Result<DecodedImage, DecodeError> {
    let encoded = match payload {
        ImagePayload::DataUrl(url) => EncodedImage::from_data_url(&url)?,
        ImagePayload::Bytes(bytes) => EncodedImage::from_bytes(bytes),
    };
    decode_encoded(&encoded)
}

/// Decode already-extracted image bytes.
///
/// `load_from_memory` reads every pixel before returning, so truncated data
/// fails here and not during inference.
pub fn decode_encoded(encoded: &EncodedImage) -> Result<DecodedImage, DecodeError> {
    let dynamic = image::load_from_memory(encoded.bytes())?;
    let color = dynamic.color();

    let pixels = match dynamic {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            tracing::trace!(?color, "Converting image to RGB");
            other.into_rgb8()
        }
    };

    Ok(DecodedImage { pixels })
}
