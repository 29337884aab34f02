use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::debug;

use crate::error::AnalysisError;

/// A chart image that has been decoded and is ready to send to the model
#[derive(Debug, Clone)]
pub struct ChartImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

impl ChartImage {
    /// Decode raw bytes as an image.
    ///
    /// PNG, JPEG and WebP are forwarded as-is; any other raster format the
    /// decoder understands is re-encoded to PNG, which every vision model
    /// accepts.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, AnalysisError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| AnalysisError::InvalidInput(format!("Invalid image format: {}", e)))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| AnalysisError::InvalidInput(format!("Invalid image format: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());

        let (bytes, mime_type) = match format {
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP => {
                (bytes, format.to_mime_type().to_string())
            }
            other => {
                debug!("Re-encoding {:?} chart image as PNG", other);
                let mut out = Cursor::new(Vec::new());
                decoded.write_to(&mut out, ImageFormat::Png).map_err(|e| {
                    AnalysisError::InvalidInput(format!("Invalid image format: {}", e))
                })?;
                (out.into_inner(), "image/png".to_string())
            }
        };

        Ok(Self {
            bytes,
            mime_type,
            width,
            height,
        })
    }

    /// Decode the payload of a `data:<mime>;base64,<payload>` URL
    pub fn from_data_url(data_url: &str) -> Result<Self, AnalysisError> {
        let payload = data_url_payload(data_url).ok_or_else(|| {
            AnalysisError::InvalidInput("Invalid image data: expected a data URL".to_string())
        })?;

        // line breaks and other whitespace inside the payload are ignored
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let bytes = BASE64
            .decode(&compact)
            .map_err(|e| AnalysisError::InvalidInput(format!("Invalid image data: {}", e)))?;

        Self::decode(bytes).map_err(|e| match e {
            AnalysisError::InvalidInput(msg) => {
                AnalysisError::InvalidInput(format!("Invalid image data: {}", msg))
            }
            other => other,
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

/// Text between the first and second comma of a data URL
fn data_url_payload(data_url: &str) -> Option<&str> {
    data_url.split(',').nth(1)
}

/// SHA-256 of the raw uploaded bytes, hex encoded
pub fn image_content_hash(image_content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 3, image::Rgb([255, 0, 0]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
