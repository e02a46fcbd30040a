// Text region detection
//
// Two statically known engines behind one trait, chosen once at startup:
// the Gemini vision model, or a fallback that finds nothing so every image
// passes through unchanged.

mod gemini;

pub use gemini::{parse_detection_response, GeminiRegionDetector};

use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::config::{Config, OcrEngine};
use crate::core::errors::DetectionResult;
use crate::core::types::TextRegion;
use crate::services::api_client::ApiClient;
use crate::utils::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Gemini,
    Fallback,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Fallback => "fallback",
        }
    }
}

/// Raw detection engine. Results are unfiltered; use `DetectionService`.
#[async_trait]
pub trait RegionDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    async fn detect_raw(&self, image: &RgbaImage) -> DetectionResult<Vec<TextRegion>>;
}

/// Used when no real engine is available. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackRegionDetector;

#[async_trait]
impl RegionDetector for FallbackRegionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Fallback
    }

    async fn detect_raw(&self, _image: &RgbaImage) -> DetectionResult<Vec<TextRegion>> {
        Ok(Vec::new())
    }
}

/// Availability probe, run once at startup.
pub fn select_detector(config: &Config, client: Option<Arc<ApiClient>>) -> Arc<dyn RegionDetector> {
    match (config.detection.engine, client) {
        (OcrEngine::Gemini, Some(client)) if client.is_configured() => {
            info!("Region detector: Gemini ({})", config.detection.model);
            Arc::new(GeminiRegionDetector::new(client, config))
        }
        (OcrEngine::Gemini, _) => {
            info!("Region detector: fallback (no GEMINI_API_KEYS configured), images pass through unchanged");
            Arc::new(FallbackRegionDetector)
        }
        (OcrEngine::None, _) => {
            info!("Region detector: fallback (OCR_ENGINE=none)");
            Arc::new(FallbackRegionDetector)
        }
    }
}

/// Regions that survived filtering, plus how many were discarded
#[derive(Debug, Clone, Default)]
pub struct FilteredRegions {
    pub kept: Vec<TextRegion>,
    pub discarded: usize,
}

/// Drop regions below `threshold`, with blank text, or with no area left
/// after clamping to the image. Surviving boxes always lie inside the image.
pub fn filter_regions(
    raw: Vec<TextRegion>,
    width: u32,
    height: u32,
    threshold: f32,
) -> FilteredRegions {
    let total = raw.len();
    let kept: Vec<TextRegion> = raw
        .into_iter()
        .filter(|region| region.confidence.is_finite() && region.confidence >= threshold)
        .filter(|region| !region.text.trim().is_empty())
        .filter_map(|region| {
            let bbox = region.bbox.clamp_to(width, height)?;
            Some(TextRegion {
                bbox,
                text: region.text.trim().to_string(),
                confidence: region.confidence.min(1.0),
            })
        })
        .collect();

    FilteredRegions {
        discarded: total - kept.len(),
        kept,
    }
}

/// Detector plus the filtering every caller needs
#[derive(Clone)]
pub struct DetectionService {
    detector: Arc<dyn RegionDetector>,
    threshold: f32,
    metrics: Option<Metrics>,
}

impl DetectionService {
    pub fn new(detector: Arc<dyn RegionDetector>, threshold: f32, metrics: Option<Metrics>) -> Self {
        Self {
            detector,
            threshold,
            metrics,
        }
    }

    pub fn kind(&self) -> DetectorKind {
        self.detector.kind()
    }

    /// Whether the real engine (not the fallback) is in use
    pub fn is_available(&self) -> bool {
        self.kind() != DetectorKind::Fallback
    }

    #[instrument(skip(self, image), fields(detector = self.kind().as_str(), width = image.width(), height = image.height()))]
    pub async fn detect(&self, image: &RgbaImage) -> DetectionResult<Vec<TextRegion>> {
        let start = Instant::now();
        let raw = self.detector.detect_raw(image).await?;
        let filtered = filter_regions(raw, image.width(), image.height(), self.threshold);

        debug!(
            "Detected {} regions ({} discarded) in {:?}",
            filtered.kept.len(),
            filtered.discarded,
            start.elapsed()
        );
        if let Some(ref m) = self.metrics {
            m.record_regions(filtered.kept.len(), filtered.discarded);
            m.record_stage_duration("detect", start.elapsed());
        }
        Ok(filtered.kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BoundingBox;
    use image::Rgba;

    fn region(x: u32, y: u32, w: u32, h: u32, confidence: f32, text: &str) -> TextRegion {
        TextRegion {
            bbox: BoundingBox::new(x, y, w, h),
            text: text.to_string(),
            confidence,
        }
    }

    struct FixedDetector(Vec<TextRegion>);

    #[async_trait]
    impl RegionDetector for FixedDetector {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Gemini
        }

        async fn detect_raw(&self, _image: &RgbaImage) -> DetectionResult<Vec<TextRegion>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_low_confidence_regions_discarded() {
        let raw = vec![
            region(0, 0, 10, 10, 0.29, "low"),
            region(0, 0, 10, 10, 0.3, "edge"),
            region(0, 0, 10, 10, 0.9, "high"),
            region(0, 0, 10, 10, f32::NAN, "nan"),
        ];
        let filtered = filter_regions(raw, 100, 100, 0.3);
        let texts: Vec<&str> = filtered.kept.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["edge", "high"]);
        assert_eq!(filtered.discarded, 2);
    }

    #[test]
    fn test_zero_area_and_outside_regions_discarded() {
        let raw = vec![
            region(5, 5, 0, 10, 0.9, "flat"),
            region(200, 200, 10, 10, 0.9, "outside"),
            region(95, 95, 10, 10, 0.9, "clipped"),
            region(1, 1, 5, 5, 0.9, "   "),
        ];
        let filtered = filter_regions(raw, 100, 100, 0.3);
        assert_eq!(filtered.kept.len(), 1);
        assert_eq!(filtered.kept[0].bbox, BoundingBox::new(95, 95, 5, 5));
        assert!(filtered.kept[0].bbox.fits_within(100, 100));
    }

    #[tokio::test]
    async fn test_fallback_detects_nothing() {
        let service = DetectionService::new(Arc::new(FallbackRegionDetector), 0.3, None);
        let image = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        assert!(service.detect(&image).await.unwrap().is_empty());
        assert!(!service.is_available());
    }

    #[tokio::test]
    async fn test_service_applies_filter() {
        let detector = FixedDetector(vec![
            region(0, 0, 5, 5, 0.1, "noise"),
            region(2, 2, 5, 5, 0.8, "Hello"),
        ]);
        let metrics = Metrics::new();
        let service = DetectionService::new(Arc::new(detector), 0.3, Some(metrics.clone()));
        let image = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));

        let regions = service.detect(&image).await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "Hello");
        assert_eq!(metrics.snapshot().regions_filtered, 1);
    }

    #[test]
    fn test_select_detector_without_keys_falls_back() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(select_detector(&config, None).kind(), DetectorKind::Fallback);
    }
}
