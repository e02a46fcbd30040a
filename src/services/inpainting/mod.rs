// Text removal by background reconstruction
//
// Each box is filled with the dominant colour of a thin ring of pixels around
// it (ignoring pixels that belong to other boxes). Blend mode then softens
// the seam with a Gaussian blur over a slightly larger patch.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::core::config::{Config, InpaintMode};
use crate::core::errors::{InpaintError, InpaintResult};
use crate::core::types::BoundingBox;

/// Erase text inside `boxes`. Must not modify `image` and must be deterministic.
pub trait TextRemover: Send + Sync {
    fn remove_text(&self, image: &RgbaImage, boxes: &[BoundingBox]) -> InpaintResult<RgbaImage>;
}

#[derive(Debug, Clone)]
pub struct BackgroundFillInpainter {
    mode: InpaintMode,
    border: u32,
    blur_sigma: f32,
}

impl BackgroundFillInpainter {
    pub fn new(mode: InpaintMode, border: u32, blur_sigma: f32) -> Self {
        Self {
            mode,
            border: border.max(1),
            blur_sigma,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.inpaint.mode, config.inpaint.border, config.inpaint.blur_sigma)
    }

    fn fill_colour(&self, image: &RgbaImage, target: &BoundingBox, all: &[BoundingBox]) -> Rgba<u8> {
        let (width, height) = image.dimensions();
        let ring = target.expand(self.border, width, height);

        let mut histogram = ColourHistogram::default();
        for y in ring.y..ring.bottom() {
            for x in ring.x..ring.right() {
                if all.iter().any(|bbox| contains(bbox, x, y)) {
                    continue;
                }
                histogram.add(image.get_pixel(x, y));
            }
        }

        // Box touches every neighbour or spans the image: fall back to its own pixels
        if histogram.is_empty() {
            for y in target.y..target.bottom() {
                for x in target.x..target.right() {
                    histogram.add(image.get_pixel(x, y));
                }
            }
        }

        histogram.dominant().unwrap_or(Rgba([255, 255, 255, 255]))
    }

    fn blend_seams(&self, output: &mut RgbaImage, boxes: &[BoundingBox]) {
        if self.blur_sigma <= 0.0 {
            return;
        }
        let (width, height) = output.dimensions();
        let margin = (self.blur_sigma * 2.0).ceil() as u32 + 1;

        for bbox in boxes {
            let patch = bbox.expand(margin, width, height);
            let region = image::imageops::crop_imm(&*output, patch.x, patch.y, patch.width, patch.height).to_image();
            let blurred = image::imageops::blur(&region, self.blur_sigma);
            image::imageops::replace(output, &blurred, patch.x as i64, patch.y as i64);
        }
    }
}

impl TextRemover for BackgroundFillInpainter {
    #[instrument(skip(self, image, boxes), fields(boxes = boxes.len()))]
    fn remove_text(&self, image: &RgbaImage, boxes: &[BoundingBox]) -> InpaintResult<RgbaImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(InpaintError::EmptyImage { width, height });
        }

        let mut clamped: Vec<BoundingBox> = boxes
            .iter()
            .filter_map(|bbox| bbox.clamp_to(width, height))
            .collect();
        // Stable order so overlapping boxes always resolve the same way
        clamped.sort_by_key(|bbox| (bbox.x, bbox.y, bbox.width, bbox.height));
        clamped.dedup();

        let mut output = image.clone();
        if clamped.is_empty() {
            return Ok(output);
        }

        // Colours are sampled from the untouched source, so order does not matter here
        let colours: Vec<Rgba<u8>> = clamped
            .par_iter()
            .map(|bbox| self.fill_colour(image, bbox, &clamped))
            .collect();

        for (bbox, colour) in clamped.iter().zip(&colours) {
            for y in bbox.y..bbox.bottom() {
                for x in bbox.x..bbox.right() {
                    output.put_pixel(x, y, *colour);
                }
            }
        }

        if self.mode == InpaintMode::Blend {
            self.blend_seams(&mut output, &clamped);
        }

        debug!("Inpainted {} regions", clamped.len());
        Ok(output)
    }
}

fn contains(bbox: &BoundingBox, x: u32, y: u32) -> bool {
    x >= bbox.x && x < bbox.right() && y >= bbox.y && y < bbox.bottom()
}

/// Colours bucketed at 5 bits per channel; the dominant bucket's mean wins.
#[derive(Default)]
struct ColourHistogram {
    buckets: HashMap<u32, Bucket>,
}

#[derive(Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: [u64; 4],
}

impl ColourHistogram {
    fn add(&mut self, pixel: &Rgba<u8>) {
        let [r, g, b, a] = pixel.0;
        let key = ((r as u32 >> 3) << 15) | ((g as u32 >> 3) << 10) | ((b as u32 >> 3) << 5) | (a as u32 >> 3);
        let bucket = self.buckets.entry(key).or_default();
        bucket.count += 1;
        for (sum, channel) in bucket.sum.iter_mut().zip(pixel.0) {
            *sum += channel as u64;
        }
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn dominant(&self) -> Option<Rgba<u8>> {
        // Ties go to the lowest key so the choice never depends on hash order
        let (_, bucket) = self
            .buckets
            .iter()
            .max_by(|(ka, a), (kb, b)| a.count.cmp(&b.count).then(kb.cmp(ka)))?;
        let mean = |i: usize| (bucket.sum[i] / bucket.count) as u8;
        Some(Rgba([mean(0), mean(1), mean(2), mean(3)]))
    }
}
