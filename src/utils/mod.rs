pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{bound_dimensions, decode_rgba, encode_jpeg, encode_png, encode_png_async, luminance};
pub use metrics::{Metrics, MetricsSnapshot};
