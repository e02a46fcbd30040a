// Custom error types for the translation pipeline
//
// One thiserror enum per component, plus PipelineError which the orchestrator
// surfaces to callers. Only PipelineError::user_message() is ever shown to users.

use thiserror::Error;

/// Upload validation errors (no processing attempted)
#[derive(Debug, Error)]
pub enum InputError {
    #[error("No file selected")]
    MissingFile,

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },
}

/// Container extraction errors (fatal for the whole file)
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("Archive contains no decodable images")]
    EmptyArchive,

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("PDF engine unavailable: {0}")]
    PdfEngineUnavailable(String),

    #[error("Container holds more than {limit} images")]
    TooManyImages { limit: usize },

    #[error("Extraction timed out after {0}s")]
    Timeout(u64),

    #[error("Temporary file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Region detection errors (never fatal, the image degrades to pass-through)
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection engine unavailable")]
    Unavailable,

    #[error("Detection request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid detection response: {0}")]
    InvalidResponse(String),

    #[error("Image encoding for detection failed: {0}")]
    Encoding(#[from] image::ImageError),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
}

/// Remote engine call errors, converted into the calling component's error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No API keys configured")]
    NoApiKeys,

    #[error("No API key currently usable")]
    NoHealthyKey,

    #[error("Circuit '{0}' is open")]
    CircuitOpen(&'static str),

    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ApiError> for DetectionError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NoApiKeys | ApiError::NoHealthyKey | ApiError::CircuitOpen(_) => {
                Self::Unavailable
            }
            ApiError::InvalidResponse(reason) => Self::InvalidResponse(reason),
            other => Self::RequestFailed(other.to_string()),
        }
    }
}

impl From<ApiError> for TranslationError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NoApiKeys => Self::NoApiKeys("gemini"),
            ApiError::CircuitOpen(_) => Self::CircuitOpen,
            ApiError::InvalidResponse(reason) => Self::InvalidResponse(reason),
            other => Self::RequestFailed(other.to_string()),
        }
    }
}

/// Translation errors (recovered per region with the original text)
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid translation response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported language pair {source_lang} -> {target_lang}")]
    UnsupportedLanguage { source_lang: String, target_lang: String },

    #[error("Translation service unavailable (circuit open)")]
    CircuitOpen,

    #[error("No API keys configured for {0}")]
    NoApiKeys(&'static str),

    #[error("Translation timed out after {0}s")]
    Timeout(u64),
}

/// Inpainting errors (recovered per image according to the failure policy)
#[derive(Debug, Error)]
pub enum InpaintError {
    #[error("Cannot inpaint an empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Inpainting task failed: {0}")]
    TaskFailed(String),

    #[error("Inpainting timed out after {0}s")]
    Timeout(u64),
}

/// Rendering service errors (recovered per image according to the failure policy)
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Font not found: {family} (searched paths: {paths:?})")]
    FontNotFound {
        family: String,
        paths: Vec<String>,
    },

    #[error("Font loading failed: {0}")]
    FontLoadError(String),

    #[error("Invalid region dimensions: {0}")]
    InvalidRegion(String),

    #[error("Rendering task failed: {0}")]
    TaskFailed(String),

    #[error("Rendering timed out after {0}s")]
    Timeout(u64),
}

/// Output packaging errors
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Output bundle is empty")]
    EmptyBundle,

    #[error("Zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Zip write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline orchestration errors (terminal `Failed` state of a file)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Image {index} failed during {stage}: {reason}")]
    ImageFailed {
        index: usize,
        stage: &'static str,
        reason: String,
    },

    #[error("All {total} images failed to process")]
    AllImagesFailed { total: usize },

    #[error("Packaging failed: {0}")]
    Packaging(#[from] PackageError),

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl PipelineError {
    /// Message safe to show to the uploader: no internal error chains.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(e) => e.to_string(),
            Self::Extraction(ExtractionError::UnsupportedDocument(reason)) => {
                format!("Unsupported document: {}", reason)
            }
            Self::Extraction(ExtractionError::EmptyArchive) => {
                "The archive does not contain any supported images".to_string()
            }
            Self::Extraction(ExtractionError::TooManyImages { limit }) => {
                format!("The file contains more than {} images", limit)
            }
            Self::Extraction(ExtractionError::UnsupportedExtension(ext)) => {
                format!("Invalid file type: {}", ext)
            }
            Self::Extraction(ExtractionError::PdfEngineUnavailable(_)) => {
                "PDF processing is not available on this server".to_string()
            }
            Self::Extraction(ExtractionError::Timeout(_)) => {
                "Reading the file took too long".to_string()
            }
            Self::Extraction(_) => "The file could not be read".to_string(),
            Self::ImageFailed { index, stage, .. } => {
                format!("Image {} could not be processed ({})", index + 1, stage)
            }
            Self::AllImagesFailed { total } => {
                format!("None of the {} images could be processed", total)
            }
            Self::Packaging(_) | Self::TaskJoinFailed(_) => {
                "Internal error while preparing the result".to_string()
            }
        }
    }

    /// Short machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Extraction(ExtractionError::UnsupportedDocument(_)) => "unsupported_document",
            Self::Extraction(ExtractionError::EmptyArchive) => "empty_archive",
            Self::Extraction(ExtractionError::PdfEngineUnavailable(_)) => "pdf_engine_unavailable",
            Self::Extraction(ExtractionError::Timeout(_)) => "extraction_timeout",
            Self::Extraction(_) => "extraction_failed",
            Self::ImageFailed { .. } => "image_failed",
            Self::AllImagesFailed { .. } => "all_images_failed",
            Self::Packaging(_) | Self::TaskJoinFailed(_) => "internal_error",
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("Font size padding must be in [0.0, 1.0), got {0}")]
    InvalidPadding(f32),

    #[error("Invalid font size bounds: min {min}, max {max}")]
    InvalidFontBounds { min: u32, max: u32 },

    #[error("{name} must be > 0, got {value}")]
    NotPositive { name: &'static str, value: u64 },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid format sets: {0}")]
    InvalidFormats(String),
}

// Convenience type aliases for Results
pub type ApiResult<T> = Result<T, ApiError>;
pub type ExtractionResult<T> = Result<T, ExtractionError>;
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type InpaintResult<T> = Result<T, InpaintError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type PackageResult<T> = Result<T, PackageError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_chain() {
        let err = PipelineError::Extraction(ExtractionError::CorruptArchive(
            "invalid central directory at offset 0x1f".to_string(),
        ));
        let message = err.user_message();
        assert!(!message.contains("0x1f"));
        assert_eq!(err.code(), "extraction_failed");
    }

    #[test]
    fn test_user_message_for_empty_archive() {
        let err = PipelineError::from(ExtractionError::EmptyArchive);
        assert_eq!(err.code(), "empty_archive");
        assert!(err.user_message().contains("archive"));
    }
}
