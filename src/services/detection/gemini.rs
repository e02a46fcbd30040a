use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use image::RgbaImage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{DetectorKind, RegionDetector};
use crate::core::config::Config;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{BoundingBox, TextRegion};
use crate::services::api_client::ApiClient;
use crate::utils::image_ops::encode_jpeg;

/// Gemini reports boxes on a 0..1000 grid regardless of image size
const BOX_SCALE: f32 = 1000.0;

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    regions: Vec<RawRegion>,
}

#[derive(Debug, Deserialize)]
struct RawRegion {
    text: String,
    /// [ymin, xmin, ymax, xmax]
    box_2d: [f32; 4],
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

pub struct GeminiRegionDetector {
    client: Arc<ApiClient>,
    jpeg_quality: u8,
    languages: Vec<String>,
}

impl GeminiRegionDetector {
    pub fn new(client: Arc<ApiClient>, config: &Config) -> Self {
        Self {
            client,
            jpeg_quality: config.image.quality,
            languages: config.detection.languages.clone(),
        }
    }

    fn prompt(&self) -> String {
        format!(
            "Find every block of readable text in this image (expected languages: {}). \
             Group words that belong to the same line or speech bubble into one region. \
             For each region return the exact text, a tight box_2d as [ymin, xmin, ymax, xmax] \
             normalized to 0-1000, and your confidence between 0 and 1 that the text is read correctly. \
             Return an empty list if the image contains no text.",
            self.languages.join(", ")
        )
    }

    fn response_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "regions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": {"type": "string"},
                            "box_2d": {"type": "array", "items": {"type": "number"}},
                            "confidence": {"type": "number"}
                        },
                        "required": ["text", "box_2d", "confidence"]
                    }
                }
            },
            "required": ["regions"]
        })
    }
}

#[async_trait]
impl RegionDetector for GeminiRegionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Gemini
    }

    async fn detect_raw(&self, image: &RgbaImage) -> DetectionResult<Vec<TextRegion>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidImageSize { width, height });
        }

        let owned = image.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&owned, quality))
            .await
            .map_err(|e| DetectionError::RequestFailed(format!("encoding task failed: {}", e)))??;

        let parts = vec![
            json!({
                "inline_data": {
                    "mime_type": "image/jpeg",
                    "data": general_purpose::STANDARD.encode(&jpeg)
                }
            }),
            json!({ "text": self.prompt() }),
        ];

        let text = self.client.generate_json(parts, Self::response_schema()).await?;
        parse_detection_response(&text, width, height)
    }
}

/// Convert the model's JSON into pixel-space regions. Boxes are normalized so
/// that min <= max and clamped to the 0..1000 grid; filtering happens later.
pub fn parse_detection_response(
    text: &str,
    width: u32,
    height: u32,
) -> DetectionResult<Vec<TextRegion>> {
    let response: DetectionResponse = serde_json::from_str(text)
        .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

    let to_pixels = |value: f32, extent: u32| -> u32 {
        let value = if value.is_finite() { value } else { 0.0 };
        ((value.clamp(0.0, BOX_SCALE) / BOX_SCALE) * extent as f32).round() as u32
    };

    Ok(response
        .regions
        .into_iter()
        .map(|raw| {
            let [y0, x0, y1, x1] = raw.box_2d;
            let left = to_pixels(x0.min(x1), width);
            let right = to_pixels(x0.max(x1), width);
            let top = to_pixels(y0.min(y1), height);
            let bottom = to_pixels(y0.max(y1), height);
            TextRegion {
                bbox: BoundingBox::new(left, top, right - left, bottom - top),
                text: raw.text,
                confidence: raw.confidence,
            }
        })
        .collect())
}
