use async_trait::async_trait;
use cosmic_text::{
    fontdb, Align, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping,
    SwashCache, Wrap,
};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{BoundingBox, TranslatedRegion};
use crate::utils::image_ops::luminance;

/// Places searched after ARABIC_FONT_PATH
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/amiri/amiri-regular.ttf",
    "/usr/share/fonts/opentype/amiri/amiri-regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoNaskhArabic-Regular.ttf",
];

const LINE_HEIGHT_RATIO: f32 = 1.4;

/// Draw translated text into its boxes on a cleaned image.
#[async_trait]
pub trait TextRenderer: Send + Sync {
    async fn render(&self, image: &RgbaImage, regions: &[TranslatedRegion]) -> RenderingResult<RgbaImage>;
}

/// Largest size in `[min, max]` for which `fits` holds, assuming fit is
/// monotonic in size. Returns `(min, false)` when nothing fits.
pub fn fit_font_size(min: u32, max: u32, mut fits: impl FnMut(u32) -> bool) -> (u32, bool) {
    if min > max || !fits(min) {
        return (min, false);
    }
    let (mut lo, mut hi) = (min, max);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    (lo, true)
}

/// Black on light backgrounds, white on dark ones
pub fn text_colour_for(image: &RgbaImage, bbox: &BoundingBox) -> Rgba<u8> {
    let Some(bbox) = bbox.clamp_to(image.width(), image.height()) else {
        return Rgba([0, 0, 0, 255]);
    };
    let mut total = 0.0f64;
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            total += luminance(image.get_pixel(x, y)) as f64;
        }
    }
    let mean = total / bbox.area() as f64;
    if mean >= 128.0 {
        Rgba([0, 0, 0, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}

struct FontState {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

struct RendererInner {
    fonts: Mutex<FontState>,
    family: String,
    min_font_size: u32,
    max_font_size: u32,
    padding: f32,
}

/// cosmic-text renderer with a single Arabic face loaded from disk.
///
/// Shaping (joining forms, right-to-left runs) is handled by cosmic-text;
/// all layout and drawing runs on a blocking thread.
#[derive(Clone)]
pub struct CosmicTextRenderer {
    inner: Arc<RendererInner>,
}

impl CosmicTextRenderer {
    pub fn new(config: &Config) -> RenderingResult<Self> {
        let mut paths = vec![config.rendering.font_path.clone()];
        paths.extend(SYSTEM_FONT_PATHS.iter().map(|p| p.to_string()));
        let (font_system, family) = Self::create_font_system(&paths)?;

        Ok(Self {
            inner: Arc::new(RendererInner {
                fonts: Mutex::new(FontState {
                    font_system,
                    swash_cache: SwashCache::new(),
                }),
                family,
                min_font_size: config.rendering.min_font_size,
                max_font_size: config.rendering.max_font_size,
                padding: config.rendering.font_size_padding,
            }),
        })
    }

    /// Load the first readable font from `paths` into an otherwise empty
    /// database (no system font scan) and return its family name.
    fn create_font_system(paths: &[String]) -> RenderingResult<(FontSystem, String)> {
        let path = paths
            .iter()
            .find(|path| Path::new(path).is_file())
            .ok_or_else(|| RenderingError::FontNotFound {
                family: "Arabic".to_string(),
                paths: paths.to_vec(),
            })?;

        let font_data = std::fs::read(path)
            .map_err(|e| RenderingError::FontLoadError(format!("{}: {}", path, e)))?;
        let mut db = fontdb::Database::new();
        db.load_font_data(font_data);

        let family = db
            .faces()
            .next()
            .and_then(|face| face.families.first().map(|(name, _)| name.clone()))
            .ok_or_else(|| RenderingError::FontLoadError(format!("{}: no usable font face", path)))?;

        info!("Arabic font '{}' loaded from {}", family, path);
        Ok((FontSystem::new_with_locale_and_db("ar".to_string(), db), family))
    }

    pub fn family(&self) -> &str {
        &self.inner.family
    }
}

impl RendererInner {
    fn shape(&self, state: &mut FontState, text: &str, font_size: f32, max_width: f32) -> Buffer {
        let metrics = Metrics::new(font_size, font_size * LINE_HEIGHT_RATIO);
        let mut buffer = Buffer::new(&mut state.font_system, metrics);
        buffer.set_size(&mut state.font_system, Some(max_width), None);
        buffer.set_wrap(&mut state.font_system, Wrap::Word);

        let attrs = Attrs::new().family(Family::Name(&self.family));
        buffer.set_text(&mut state.font_system, text, &attrs, Shaping::Advanced);
        for line in buffer.lines.iter_mut() {
            line.set_align(Some(Align::Center));
        }
        buffer.shape_until_scroll(&mut state.font_system, false);
        buffer
    }

    /// (widest line, total height) of the shaped buffer
    fn measure(buffer: &Buffer) -> (f32, f32) {
        buffer.layout_runs().fold((0.0f32, 0.0f32), |(width, height), run| {
            (width.max(run.line_w), height + run.line_height)
        })
    }

    fn render_region(&self, state: &mut FontState, image: &mut RgbaImage, region: &TranslatedRegion) {
        let Some(bbox) = region.bbox.clamp_to(image.width(), image.height()) else {
            return;
        };
        let text = region.text.trim();
        if text.is_empty() {
            return;
        }

        let avail_w = (bbox.width as f32 * (1.0 - self.padding)).max(1.0);
        let avail_h = (bbox.height as f32 * (1.0 - self.padding)).max(1.0);

        let (size, fits) = fit_font_size(self.min_font_size, self.max_font_size, |size| {
            let buffer = self.shape(state, text, size as f32, avail_w);
            let (width, height) = Self::measure(&buffer);
            width <= avail_w && height <= avail_h
        });
        if !fits {
            debug!("Text does not fit {} even at {}px, clipping", bbox, size);
        }

        let buffer = self.shape(state, text, size as f32, avail_w);
        let (_, text_h) = Self::measure(&buffer);
        let origin_x = bbox.x as i32 + ((bbox.width as f32 - avail_w) / 2.0).round() as i32;
        let origin_y = bbox.y as i32 + ((bbox.height as f32 - text_h) / 2.0).max(0.0).round() as i32;

        let colour = text_colour_for(image, &bbox);
        let cosmic_colour = CosmicColor::rgba(colour[0], colour[1], colour[2], colour[3]);
        let (min_x, min_y) = (bbox.x as i32, bbox.y as i32);
        let (max_x, max_y) = (bbox.right() as i32, bbox.bottom() as i32);

        let FontState {
            font_system,
            swash_cache,
        } = state;
        buffer.draw(font_system, swash_cache, cosmic_colour, |px, py, w, h, pixel| {
            let alpha = pixel.a() as f32 / 255.0;
            if alpha == 0.0 {
                return;
            }
            for dy in 0..h as i32 {
                for dx in 0..w as i32 {
                    let x = origin_x + px + dx;
                    let y = origin_y + py + dy;
                    // Clip to the region box (which already lies inside the canvas)
                    if x < min_x || x >= max_x || y < min_y || y >= max_y {
                        continue;
                    }
                    let existing = image.get_pixel(x as u32, y as u32);
                    let inv_alpha = 1.0 - alpha;
                    let blended = Rgba([
                        (pixel.r() as f32 * alpha + existing[0] as f32 * inv_alpha) as u8,
                        (pixel.g() as f32 * alpha + existing[1] as f32 * inv_alpha) as u8,
                        (pixel.b() as f32 * alpha + existing[2] as f32 * inv_alpha) as u8,
                        existing[3].max(pixel.a()),
                    ]);
                    image.put_pixel(x as u32, y as u32, blended);
                }
            }
        });
    }

    fn render_sync(&self, image: &RgbaImage, regions: &[TranslatedRegion]) -> RgbaImage {
        let mut output = image.clone();

        // Overlapping boxes are drawn left to right, then top to bottom
        let mut ordered: Vec<&TranslatedRegion> = regions.iter().collect();
        ordered.sort_by_key(|region| (region.bbox.x, region.bbox.y));

        let mut state = self.fonts.lock();
        for region in ordered {
            self.render_region(&mut state, &mut output, region);
        }
        output
    }
}

#[async_trait]
impl TextRenderer for CosmicTextRenderer {
    #[instrument(skip(self, image, regions), fields(regions = regions.len()))]
    async fn render(&self, image: &RgbaImage, regions: &[TranslatedRegion]) -> RenderingResult<RgbaImage> {
        if regions.is_empty() {
            return Ok(image.clone());
        }

        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        let regions = regions.to_vec();
        tokio::task::spawn_blocking(move || inner.render_sync(&image, &regions))
            .await
            .map_err(|e| {
                warn!("Rendering task failed: {}", e);
                RenderingError::TaskFailed(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_font(path: &str) -> Config {
        let path = path.to_string();
        Config::from_lookup(move |key| (key == "ARABIC_FONT_PATH").then(|| path.clone())).unwrap()
    }

    #[test]
    fn test_fit_picks_largest_fitting_size() {
        // "text" fits while size * 10 <= 300
        let (size, fits) = fit_font_size(8, 200, |size| size * 10 <= 300);
        assert_eq!(size, 30);
        assert!(fits);
    }

    #[test]
    fn test_fit_uses_max_when_everything_fits() {
        assert_eq!(fit_font_size(8, 200, |_| true), (200, true));
    }

    #[test]
    fn test_fit_falls_back_to_min() {
        assert_eq!(fit_font_size(8, 200, |_| false), (8, false));
    }

    #[test]
    fn test_fit_probes_logarithmically() {
        let mut probes = 0;
        fit_font_size(8, 200, |size| {
            probes += 1;
            size <= 77
        });
        assert!(probes <= 10);
    }

    #[test]
    fn test_text_colour_contrasts_background() {
        let light = RgbaImage::from_pixel(10, 10, Rgba([240, 240, 240, 255]));
        let dark = RgbaImage::from_pixel(10, 10, Rgba([20, 20, 40, 255]));
        let bbox = BoundingBox::new(2, 2, 5, 5);
        assert_eq!(text_colour_for(&light, &bbox), Rgba([0, 0, 0, 255]));
        assert_eq!(text_colour_for(&dark, &bbox), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_missing_font_is_reported() {
        let paths = vec!["/nonexistent/font.ttf".to_string()];
        let err = CosmicTextRenderer::create_font_system(&paths).err().unwrap();
        assert!(matches!(err, RenderingError::FontNotFound { .. }));
    }

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn fixture_renderer() -> CosmicTextRenderer {
        let font = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fonts/NotoSansArabic.ttf");
        CosmicTextRenderer::new(&config_with_font(font)).unwrap()
    }

    fn region(bbox: BoundingBox, text: &str) -> TranslatedRegion {
        TranslatedRegion {
            bbox,
            confidence: 0.9,
            text: text.to_string(),
            untranslated: false,
        }
    }

    /// (left, top, right, bottom) of every pixel that differs from `background`
    fn ink_bounds(image: &RgbaImage, background: Rgba<u8>) -> Option<(u32, u32, u32, u32)> {
        image
            .enumerate_pixels()
            .filter(|(_, _, pixel)| **pixel != background)
            .fold(None, |bounds, (x, y, _)| match bounds {
                None => Some((x, y, x, y)),
                Some((l, t, r, b)) => Some((l.min(x), t.min(y), r.max(x), b.max(y))),
            })
    }

    fn assert_ink_inside(image: &RgbaImage, boxes: &[BoundingBox]) {
        for (x, y, pixel) in image.enumerate_pixels() {
            if *pixel == WHITE {
                continue;
            }
            let covered = boxes
                .iter()
                .any(|b| x >= b.x && x < b.right() && y >= b.y && y < b.bottom());
            assert!(covered, "ink at ({}, {}) outside every region", x, y);
        }
    }

    #[test]
    fn test_fixture_font_is_loaded() {
        assert!(!fixture_renderer().family().is_empty());
    }

    #[tokio::test]
    async fn test_render_preserves_dimensions_and_stays_in_box() {
        let renderer = fixture_renderer();
        let image = RgbaImage::from_pixel(200, 120, WHITE);
        let bbox = BoundingBox::new(20, 20, 160, 60);

        let rendered = renderer.render(&image, &[region(bbox, "مرحبا بالعالم")]).await.unwrap();
        assert_eq!(rendered.dimensions(), image.dimensions());
        assert_ne!(rendered, image);
        assert_ink_inside(&rendered, &[bbox]);
    }

    #[tokio::test]
    async fn test_text_is_centred_in_its_box() {
        let renderer = fixture_renderer();
        let image = RgbaImage::from_pixel(400, 200, WHITE);
        let bbox = BoundingBox::new(50, 50, 300, 100);

        let rendered = renderer.render(&image, &[region(bbox, "مرحبا")]).await.unwrap();
        let (left, top, right, bottom) = ink_bounds(&rendered, WHITE).unwrap();

        let ink_cx = (left + right) as f32 / 2.0;
        let ink_cy = (top + bottom) as f32 / 2.0;
        assert!((ink_cx - 200.0).abs() <= 15.0, "horizontal centre {}", ink_cx);
        assert!((ink_cy - 100.0).abs() <= 25.0, "vertical centre {}", ink_cy);
        // A short word in a roomy box is scaled well past the minimum size
        assert!(bottom - top >= 20, "ink height {}", bottom - top);
    }

    #[tokio::test]
    async fn test_overlong_text_is_clipped_at_minimum_size() {
        let renderer = fixture_renderer();
        let image = RgbaImage::from_pixel(120, 60, WHITE);
        let bbox = BoundingBox::new(40, 24, 40, 12);
        let text = "هذا نص طويل جدا لا يمكن أن يتسع داخل هذا الصندوق الصغير أبدا مهما صغر الخط";

        let rendered = renderer.render(&image, &[region(bbox, text)]).await.unwrap();
        assert_ne!(rendered, image);
        assert_ink_inside(&rendered, &[bbox]);
    }

    #[tokio::test]
    async fn test_overlapping_regions_render_inside_their_union() {
        let renderer = fixture_renderer();
        let image = RgbaImage::from_pixel(200, 100, WHITE);
        let first = BoundingBox::new(10, 10, 120, 50);
        let second = BoundingBox::new(70, 30, 120, 60);

        let rendered = renderer
            .render(&image, &[region(second, "عالم"), region(first, "مرحبا")])
            .await
            .unwrap();
        assert_eq!(rendered.dimensions(), image.dimensions());
        assert_ink_inside(&rendered, &[first, second]);
    }

    #[tokio::test]
    async fn test_dark_background_gets_light_text() {
        let renderer = fixture_renderer();
        let background = Rgba([10, 10, 30, 255]);
        let image = RgbaImage::from_pixel(160, 80, background);
        let bbox = BoundingBox::new(0, 0, 160, 80);

        let rendered = renderer.render(&image, &[region(bbox, "مرحبا")]).await.unwrap();
        let brightest = rendered.pixels().map(luminance).fold(0.0f32, f32::max);
        assert!(brightest > 200.0, "brightest luminance {}", brightest);
    }
}
