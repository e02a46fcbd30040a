pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{Config, FailurePolicy, InpaintMode, OcrEngine, TranslationService};
pub use errors::{
    ConfigError, DetectionError, ExtractionError, InpaintError, InputError, PackageError,
    PipelineError, RenderingError, TranslationError,
};
pub use types::{
    BoundingBox, ExtractedImage, FileKind, FileOutcome, FileReport, ImageOutcome, ImageStage,
    InputFile, OutputBundle, ProcessedImage, TextRegion, TranslatedRegion,
};
