pub mod api_client;
pub mod detection;
pub mod extraction;
pub mod inpainting;
pub mod rendering;
pub mod translation;

// Re-export commonly used services
pub use api_client::ApiClient;
pub use detection::{DetectionService, RegionDetector};
pub use extraction::{extract, ImageStream};
pub use inpainting::{BackgroundFillInpainter, TextRemover};
pub use rendering::{CosmicTextRenderer, TextRenderer};
pub use translation::{TranslationCache, Translator};
