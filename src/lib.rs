// Library exports for the Arabic image translation service

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{
        DetectionError, ExtractionError, InpaintError, InputError, PipelineError, RenderingError,
        TranslationError,
    },
    types::{
        BoundingBox, ExtractedImage, FileOutcome, FileReport, InputFile, OutputBundle,
        ProcessedImage, TextRegion, TranslatedRegion,
    },
};

pub use middleware::{ApiKeyPool, CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{package, PackagedOutput, PipelineComponents, PipelineOrchestrator};

pub use server::{build_router, AppState};

pub use services::{
    ApiClient, BackgroundFillInpainter, CosmicTextRenderer, DetectionService, RegionDetector,
    TextRemover, TextRenderer, TranslationCache, Translator,
};

pub use utils::Metrics;
