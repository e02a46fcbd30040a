// Data model for one pass of the translation pipeline

use crate::core::config::{normalize_extension, Config};
use crate::core::errors::InputError;
use bytes::Bytes;
use image::RgbaImage;
use serde::Serialize;
use std::fmt;

/// Container kind, inferred from the declared extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Pdf,
    Archive,
}

/// An uploaded file. Lives only for the duration of one request.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub filename: String,
    pub extension: String,
    pub kind: FileKind,
    pub bytes: Bytes,
}

impl InputFile {
    /// Validate an upload against the configured allow-list and size limit.
    pub fn from_upload(
        filename: &str,
        bytes: Bytes,
        config: &Config,
    ) -> Result<Self, InputError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(InputError::MissingFile);
        }

        let extension = match filename.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => normalize_extension(ext),
            _ => return Err(InputError::InvalidFileType(filename.to_string())),
        };

        let formats = &config.formats;
        let kind = if formats.is_image_format(&extension) {
            FileKind::Image
        } else if formats.is_pdf_format(&extension) {
            FileKind::Pdf
        } else if formats.is_archive_format(&extension) {
            FileKind::Archive
        } else {
            return Err(InputError::InvalidFileType(extension));
        };

        if bytes.is_empty() {
            return Err(InputError::EmptyFile);
        }
        if bytes.len() > config.max_file_size() {
            return Err(InputError::FileTooLarge {
                size: bytes.len(),
                limit: config.max_file_size(),
            });
        }

        Ok(Self {
            filename: filename.to_string(),
            extension,
            kind,
            bytes,
        })
    }

    /// File name without directories or extension, used to name outputs
    pub fn stem(&self) -> &str {
        let name = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }
}

/// Axis-aligned box in pixel coordinates of its image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Intersect with the image rectangle. Returns None when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        let clamped = Self::new(x, y, right - x, bottom - y);
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Grow by `margin` on every side, staying inside the image
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> Self {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        let right = self.right().saturating_add(margin).min(width);
        let bottom = self.bottom().saturating_add(margin).min(height);
        Self::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// One decoded raster from a container, with its position in the source file
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub index: usize,
    pub image: RgbaImage,
}

/// A detected text region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    pub bbox: BoundingBox,
    pub text: String,
    pub confidence: f32,
}

/// A region after translation. Geometry is always the detected geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedRegion {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub text: String,
    /// True when translation failed and `text` is the original string
    pub untranslated: bool,
}

impl TranslatedRegion {
    pub fn translated(region: &TextRegion, text: String) -> Self {
        Self {
            bbox: region.bbox,
            confidence: region.confidence,
            text,
            untranslated: false,
        }
    }

    pub fn untranslated(region: &TextRegion) -> Self {
        Self {
            bbox: region.bbox,
            confidence: region.confidence,
            text: region.text.clone(),
            untranslated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Text was erased and re-rendered
    Rendered,
    /// No regions survived detection; pixels are the source image
    Unchanged,
}

/// Final PNG for one ExtractedImage
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub png: Bytes,
    pub status: ImageStatus,
}

/// Ordered results for one input file
#[derive(Debug, Clone, Default)]
pub struct OutputBundle {
    images: Vec<ProcessedImage>,
}

impl OutputBundle {
    /// Build from results in any order; the bundle is sorted by source index.
    pub fn from_images(mut images: Vec<ProcessedImage>) -> Self {
        images.sort_by_key(|image| image.index);
        Self { images }
    }

    pub fn images(&self) -> &[ProcessedImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Per-image stage, used for logging and failure attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStage {
    Detecting,
    Translating,
    Inpainting,
    Rendering,
    Encoding,
}

impl ImageStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Translating => "translating",
            Self::Inpainting => "inpainting",
            Self::Rendering => "rendering",
            Self::Encoding => "encoding",
        }
    }
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-level state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Extracting,
    PerImage,
    Collecting,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Extracting => "extracting",
            Self::PerImage => "per_image",
            Self::Collecting => "collecting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to one image
#[derive(Debug, Clone)]
pub enum ImageOutcome {
    Processed {
        image: ProcessedImage,
        regions: usize,
        untranslated: usize,
    },
    Unchanged(ProcessedImage),
    Dropped(DroppedImage),
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedImage {
    pub index: usize,
    pub stage: ImageStage,
    pub reason: String,
}

/// Summary of one file's processing
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub total_images: usize,
    pub processed: usize,
    pub unchanged: usize,
    pub dropped: Vec<DroppedImage>,
    pub regions_rendered: usize,
    pub regions_untranslated: usize,
    pub elapsed_ms: f64,
}

impl FileReport {
    pub fn record(&mut self, outcome: &ImageOutcome) {
        self.total_images += 1;
        match outcome {
            ImageOutcome::Processed {
                regions,
                untranslated,
                ..
            } => {
                self.processed += 1;
                self.regions_rendered += regions;
                self.regions_untranslated += untranslated;
            }
            ImageOutcome::Unchanged(_) => self.unchanged += 1,
            ImageOutcome::Dropped(dropped) => self.dropped.push(dropped.clone()),
        }
    }
}

/// Successful result of `process_file`
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub bundle: OutputBundle,
    pub report: FileReport,
}

/// Readiness of each pipeline component, reported by GET /health
#[derive(Debug, Clone, Serialize)]
pub struct ComponentReadiness {
    pub text_extractor: bool,
    pub translator: bool,
    pub image_processor: bool,
    pub arabic_renderer: bool,
    pub pdf_engine: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub ocr_available: bool,
    pub detector: &'static str,
    pub services: ComponentReadiness,
}
