use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageResult, Rgba, RgbaImage};
use std::io::Cursor;

/// Decode any supported raster format into RGBA8.
pub fn decode_rgba(bytes: &[u8]) -> ImageResult<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Downscale so neither side exceeds `max_dimension`, preserving aspect ratio.
///
/// Images already within bounds are returned untouched.
pub fn bound_dimensions(image: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return image;
    }

    let scale = max_dimension as f64 / width.max(height) as f64;
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
    image::imageops::resize(&image, new_width, new_height, FilterType::Lanczos3)
}

pub fn encode_png(image: &RgbaImage) -> ImageResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(png_bytes)
}

/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> ImageResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut jpeg_bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(jpeg_bytes)
}

/// Asynchronously encode an image to PNG bytes using spawn_blocking.
///
/// PNG encoding of full pages is CPU-heavy and would stall the runtime otherwise.
pub async fn encode_png_async(image: RgbaImage) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png(&image).context("Failed to encode image as PNG"))
        .await
        .context("Failed to spawn blocking task for PNG encoding")?
}

/// Relative luminance in [0, 255] (Rec. 601 weights)
pub fn luminance(pixel: &Rgba<u8>) -> f32 {
    let [r, g, b, _] = pixel.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}
