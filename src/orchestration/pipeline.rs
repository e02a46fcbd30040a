// Pipeline orchestrator: one input file in, one ordered OutputBundle out
//
// Images are pulled from the extraction stream one at a time and handed to
// spawned tasks, bounded by WORKER_POOL_SIZE. Results are collected in source
// order. Each stage runs under its own timeout and reports an explicit outcome
// per image, so the failure policy is decided here and nowhere else.

use anyhow::{Context, Result};
use futures::future::join_all;
use image::RgbaImage;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::{Config, FailurePolicy, OcrEngine, TranslationService};
use crate::core::errors::{
    ExtractionError, InpaintError, PipelineError, PipelineResult, RenderingError, TranslationError,
};
use crate::core::types::{
    BoundingBox, ComponentReadiness, DroppedImage, ExtractedImage, FileOutcome, FileReport,
    HealthStatus, ImageOutcome, ImageStage, ImageStatus, InputFile, OutputBundle, PipelineState,
    ProcessedImage, TextRegion, TranslatedRegion,
};
use crate::middleware::CircuitBreaker;
use crate::services::api_client::{ApiClient, ApiHealth};
use crate::services::detection::{select_detector, DetectionService};
use crate::services::extraction::{self, pdf_engine_available};
use crate::services::inpainting::{BackgroundFillInpainter, TextRemover};
use crate::services::rendering::{CosmicTextRenderer, TextRenderer};
use crate::services::translation::{select_translator, Translator};
use crate::utils::{encode_png_async, Metrics};

/// The pluggable stages of the pipeline
#[derive(Clone)]
pub struct PipelineComponents {
    pub detection: DetectionService,
    pub translator: Arc<dyn Translator>,
    pub remover: Arc<dyn TextRemover>,
    pub renderer: Arc<dyn TextRenderer>,
}

/// Everything one image task needs. Shared read-only between tasks.
struct ImageWorker {
    components: PipelineComponents,
    source_language: String,
    target_language: String,
    translation_permits: Arc<Semaphore>,
    detect_timeout: Duration,
    translate_timeout: Duration,
    inpaint_timeout: Duration,
    render_timeout: Duration,
    metrics: Metrics,
}

pub struct PipelineOrchestrator {
    config: Arc<Config>,
    worker: Arc<ImageWorker>,
    api_clients: Vec<Arc<ApiClient>>,
    pdf_engine: bool,
    metrics: Metrics,
}

impl PipelineOrchestrator {
    pub fn new(config: Arc<Config>, components: PipelineComponents, metrics: Metrics) -> Self {
        let pipeline = &config.pipeline;
        let worker = ImageWorker {
            components,
            source_language: config.source_language().to_string(),
            target_language: config.target_language().to_string(),
            // Shared by all requests so the translation backend sees one limit
            translation_permits: Arc::new(Semaphore::new(config.translation.concurrency)),
            detect_timeout: pipeline.detect_timeout,
            translate_timeout: pipeline.translate_timeout,
            inpaint_timeout: pipeline.inpaint_timeout,
            render_timeout: pipeline.render_timeout,
            metrics: metrics.clone(),
        };

        Self {
            pdf_engine: pdf_engine_available(),
            config,
            worker: Arc::new(worker),
            api_clients: Vec::new(),
            metrics,
        }
    }

    /// Build the production stages from configuration.
    #[instrument(skip(config, metrics))]
    pub fn from_config(config: Arc<Config>, metrics: Metrics) -> Result<Self> {
        info!("Initializing services...");

        let gemini = |circuit: &'static str| -> Result<Arc<ApiClient>> {
            let client = ApiClient::new(&config, CircuitBreaker::new(circuit), Some(metrics.clone()))
                .with_context(|| format!("Failed to build {} client", circuit))?;
            Ok(Arc::new(client))
        };
        let mut api_clients = Vec::new();

        let detection_client = match config.detection.engine {
            OcrEngine::Gemini => Some(gemini("gemini-detection")?),
            OcrEngine::None => None,
        };
        let detector = select_detector(&config, detection_client.clone());
        let detection = DetectionService::new(
            detector,
            config.confidence_threshold(),
            Some(metrics.clone()),
        );
        api_clients.extend(detection_client);

        let translation_client = match config.translation.service {
            TranslationService::Gemini => Some(gemini("gemini-translation")?),
            TranslationService::Google => None,
        };
        let translator = select_translator(&config, translation_client.clone(), Some(metrics.clone()))
            .context("Failed to build translator")?;
        api_clients.extend(translation_client);
        let renderer = CosmicTextRenderer::new(&config).context("Failed to load Arabic font")?;

        let components = PipelineComponents {
            detection,
            translator,
            remover: Arc::new(BackgroundFillInpainter::from_config(&config)),
            renderer: Arc::new(renderer),
        };
        let mut orchestrator = Self::new(config, components, metrics);
        orchestrator.api_clients = api_clients;

        info!(
            "✓ Ready (workers: {}, translation concurrency: {}, policy: {:?}, pdf: {})",
            orchestrator.config.pipeline.worker_pool_size,
            orchestrator.config.translation.concurrency,
            orchestrator.config.pipeline.failure_policy,
            if orchestrator.pdf_engine { "available" } else { "unavailable" }
        );
        Ok(orchestrator)
    }

    pub fn detection_available(&self) -> bool {
        self.worker.components.detection.is_available()
    }

    /// Key pool and circuit state of every Gemini client in use
    pub fn api_health(&self) -> Vec<ApiHealth> {
        self.api_clients.iter().map(|client| client.health()).collect()
    }

    pub fn health(&self) -> HealthStatus {
        let detection = &self.worker.components.detection;
        HealthStatus {
            status: if detection.is_available() { "healthy" } else { "degraded" },
            ocr_available: detection.is_available(),
            detector: detection.kind().as_str(),
            services: ComponentReadiness {
                text_extractor: true,
                translator: true,
                image_processor: true,
                arabic_renderer: true,
                pdf_engine: self.pdf_engine,
            },
        }
    }

    /// Run the whole pipeline for one uploaded file.
    ///
    /// Succeeds only with a non-empty bundle. Temporary buffers and in-flight
    /// image tasks are released on every exit path.
    #[instrument(skip(self, input), fields(file = %input.filename, bytes = input.bytes.len()))]
    pub async fn process_file(&self, input: InputFile) -> PipelineResult<FileOutcome> {
        let start = Instant::now();
        self.metrics.record_file_received();
        debug!("State: {}", PipelineState::Received);

        match self.run(&input, start).await {
            Ok(outcome) => {
                debug!("State: {}", PipelineState::Done);
                self.metrics.record_file_succeeded();
                info!(
                    "Processed {} in {:.2}s: {} rendered, {} unchanged, {} dropped",
                    input.filename,
                    start.elapsed().as_secs_f64(),
                    outcome.report.processed,
                    outcome.report.unchanged,
                    outcome.report.dropped.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                debug!("State: {}", PipelineState::Failed);
                self.metrics.record_file_failed(e.code());
                error!("Processing {} failed: {}", input.filename, e);
                Err(e)
            }
        }
    }

    async fn run(&self, input: &InputFile, start: Instant) -> PipelineResult<FileOutcome> {
        debug!("State: {}", PipelineState::Extracting);
        let extract_start = Instant::now();
        let mut stream = extraction::extract(input.bytes.clone(), &input.extension, &self.config)?;
        let extract_timeout = self.config.pipeline.extract_timeout;
        debug!("Reading {:?} container", stream.format());

        debug!("State: {}", PipelineState::PerImage);
        let image_permits = Arc::new(Semaphore::new(self.config.pipeline.worker_pool_size));
        let mut tasks = ImageTasks::default();

        loop {
            let next = timeout(extract_timeout, stream.next())
                .await
                .map_err(|_| ExtractionError::Timeout(extract_timeout.as_secs()))?;
            let extracted = match next {
                Some(item) => item?,
                None => break,
            };

            let permit = Arc::clone(&image_permits)
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?;
            let worker = Arc::clone(&self.worker);
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                worker.process_image(extracted).await
            }));
        }
        drop(stream);
        self.metrics
            .record_stage_duration("extract", extract_start.elapsed());

        debug!("State: {}", PipelineState::Collecting);
        let policy = self.config.pipeline.failure_policy;
        let mut report = FileReport::default();
        let mut images = Vec::with_capacity(tasks.len());

        while let Some(handle) = tasks.next_in_order() {
            let outcome = handle
                .await
                .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?;
            report.record(&outcome);

            match outcome {
                ImageOutcome::Processed { image, .. } => {
                    self.metrics.record_image_processed();
                    images.push(image);
                }
                ImageOutcome::Unchanged(image) => {
                    self.metrics.record_image_unchanged();
                    images.push(image);
                }
                ImageOutcome::Dropped(dropped) => {
                    self.metrics.record_image_dropped();
                    warn!(
                        "Image {} dropped during {}: {}",
                        dropped.index, dropped.stage, dropped.reason
                    );
                    if policy == FailurePolicy::FailFile {
                        return Err(PipelineError::ImageFailed {
                            index: dropped.index,
                            stage: dropped.stage.as_str(),
                            reason: dropped.reason,
                        });
                    }
                }
            }
        }

        if images.is_empty() {
            return Err(PipelineError::AllImagesFailed {
                total: report.total_images,
            });
        }

        report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(FileOutcome {
            bundle: OutputBundle::from_images(images),
            report,
        })
    }
}

/// Spawned image tasks in source order. Anything still running when this is
/// dropped (fatal error, cancelled request) is aborted.
#[derive(Default)]
struct ImageTasks {
    handles: VecDeque<JoinHandle<ImageOutcome>>,
}

impl ImageTasks {
    fn push(&mut self, handle: JoinHandle<ImageOutcome>) {
        self.handles.push_back(handle);
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    fn next_in_order(&mut self) -> Option<JoinHandle<ImageOutcome>> {
        self.handles.pop_front()
    }
}

impl Drop for ImageTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl ImageWorker {
    #[instrument(skip(self, extracted), fields(index = extracted.index))]
    async fn process_image(&self, extracted: ExtractedImage) -> ImageOutcome {
        let ExtractedImage { index, image } = extracted;
        let (width, height) = image.dimensions();
        let dropped = |stage: ImageStage, reason: String| {
            ImageOutcome::Dropped(DroppedImage {
                index,
                stage,
                reason,
            })
        };

        debug!("Stage: {}", ImageStage::Detecting);
        let regions = self.detect(&image).await;
        if regions.is_empty() {
            return match self.encode(image).await {
                Ok(png) => ImageOutcome::Unchanged(ProcessedImage {
                    index,
                    width,
                    height,
                    png: png.into(),
                    status: ImageStatus::Unchanged,
                }),
                Err(reason) => dropped(ImageStage::Encoding, reason),
            };
        }

        debug!("Stage: {}", ImageStage::Translating);
        let translated = self.translate_regions(&regions).await;
        let untranslated = translated.iter().filter(|r| r.untranslated).count();

        debug!("Stage: {}", ImageStage::Inpainting);
        let boxes: Vec<BoundingBox> = translated.iter().map(|region| region.bbox).collect();
        let cleaned = match self.inpaint(image, boxes).await {
            Ok(cleaned) => cleaned,
            Err(e) => return dropped(ImageStage::Inpainting, e.to_string()),
        };

        debug!("Stage: {}", ImageStage::Rendering);
        let rendered = match self.render(&cleaned, &translated).await {
            Ok(rendered) => rendered,
            Err(e) => return dropped(ImageStage::Rendering, e.to_string()),
        };
        drop(cleaned);

        debug!("Stage: {}", ImageStage::Encoding);
        match self.encode(rendered).await {
            Ok(png) => ImageOutcome::Processed {
                image: ProcessedImage {
                    index,
                    width,
                    height,
                    png: png.into(),
                    status: ImageStatus::Rendered,
                },
                regions: translated.len(),
                untranslated,
            },
            Err(reason) => dropped(ImageStage::Encoding, reason),
        }
    }

    /// Detection never fails an image: errors and timeouts mean "no text".
    async fn detect(&self, image: &RgbaImage) -> Vec<TextRegion> {
        let detection = &self.components.detection;
        match timeout(self.detect_timeout, detection.detect(image)).await {
            Ok(Ok(regions)) => regions,
            Ok(Err(e)) => {
                warn!("Detection failed, passing image through: {}", e);
                self.metrics.record_detection_fallback();
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Detection timed out after {}s, passing image through",
                    self.detect_timeout.as_secs()
                );
                self.metrics.record_detection_fallback();
                Vec::new()
            }
        }
    }

    /// One TranslatedRegion per input region, same box. Failed regions keep
    /// their original text and are flagged untranslated.
    async fn translate_regions(&self, regions: &[TextRegion]) -> Vec<TranslatedRegion> {
        let start = Instant::now();
        let translated = join_all(regions.iter().map(|region| self.translate_region(region))).await;
        self.metrics
            .record_stage_duration("translate", start.elapsed());
        translated
    }

    async fn translate_region(&self, region: &TextRegion) -> TranslatedRegion {
        let result = match self.translation_permits.acquire().await {
            Ok(_permit) => {
                let call = self.components.translator.translate(
                    &region.text,
                    &self.source_language,
                    &self.target_language,
                );
                with_timeout(self.translate_timeout, call, TranslationError::Timeout).await
            }
            Err(e) => Err(TranslationError::RequestFailed(e.to_string())),
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.metrics.record_translation(true);
                TranslatedRegion::translated(region, text)
            }
            Ok(_) => {
                debug!("Empty translation, keeping original text");
                self.metrics.record_translation(false);
                TranslatedRegion::untranslated(region)
            }
            Err(e) => {
                warn!("Translation failed, keeping original text: {}", e);
                self.metrics.record_translation(false);
                TranslatedRegion::untranslated(region)
            }
        }
    }

    async fn inpaint(&self, image: RgbaImage, boxes: Vec<BoundingBox>) -> Result<RgbaImage, InpaintError> {
        let start = Instant::now();
        let remover = Arc::clone(&self.components.remover);
        let task = async move {
            tokio::task::spawn_blocking(move || remover.remove_text(&image, &boxes))
                .await
                .map_err(|e| InpaintError::TaskFailed(e.to_string()))?
        };
        let result = with_timeout(self.inpaint_timeout, task, InpaintError::Timeout).await;
        self.metrics.record_stage_duration("inpaint", start.elapsed());
        result
    }

    async fn render(
        &self,
        image: &RgbaImage,
        regions: &[TranslatedRegion],
    ) -> Result<RgbaImage, RenderingError> {
        let start = Instant::now();
        let call = self.components.renderer.render(image, regions);
        let result = with_timeout(self.render_timeout, call, RenderingError::Timeout).await;
        self.metrics.record_stage_duration("render", start.elapsed());
        result
    }

    async fn encode(&self, image: RgbaImage) -> Result<Vec<u8>, String> {
        let start = Instant::now();
        let result = encode_png_async(image).await.map_err(|e| format!("{:#}", e));
        self.metrics.record_stage_duration("encode", start.elapsed());
        result
    }
}

/// Await `future`, turning an elapsed deadline into `on_timeout(seconds)`.
async fn with_timeout<T, E>(
    limit: Duration,
    future: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(u64) -> E,
) -> Result<T, E> {
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{DetectionError, DetectionResult, RenderingResult, TranslationResult};
    use crate::services::detection::{DetectorKind, FallbackRegionDetector, RegionDetector};
    use crate::utils::image_ops::{decode_rgba, encode_png};
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::Rgba;
    use parking_lot::Mutex;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// Returns the same raw regions for every image; fails on images of `fail_width`.
    struct StubDetector {
        regions: Vec<TextRegion>,
        fail_width: Option<u32>,
    }

    #[async_trait]
    impl RegionDetector for StubDetector {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Gemini
        }

        async fn detect_raw(&self, image: &RgbaImage) -> DetectionResult<Vec<TextRegion>> {
            if Some(image.width()) == self.fail_width {
                return Err(DetectionError::RequestFailed("HTTP 503".to_string()));
            }
            Ok(self.regions.clone())
        }
    }

    /// Upper-cases text; fails for any text equal to `fail_on`.
    struct StubTranslator {
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Translator for StubTranslator {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn translate(&self, text: &str, _source: &str, _target: &str) -> TranslationResult<String> {
            if self.fail_on.as_deref() == Some(text) {
                return Err(TranslationError::RequestFailed("HTTP 429".to_string()));
            }
            Ok(format!("AR:{}", text))
        }
    }

    /// Paints each box grey and records what it was asked to render.
    #[derive(Default)]
    struct RecordingRenderer {
        calls: Mutex<Vec<Vec<TranslatedRegion>>>,
        fail_width: Option<u32>,
    }

    #[async_trait]
    impl TextRenderer for RecordingRenderer {
        async fn render(&self, image: &RgbaImage, regions: &[TranslatedRegion]) -> RenderingResult<RgbaImage> {
            if Some(image.width()) == self.fail_width {
                return Err(RenderingError::InvalidRegion("stub failure".to_string()));
            }
            self.calls.lock().push(regions.to_vec());
            let mut output = image.clone();
            for region in regions {
                output.put_pixel(region.bbox.x, region.bbox.y, Rgba([128, 128, 128, 255]));
            }
            Ok(output)
        }
    }

    fn region(x: u32, text: &str, confidence: f32) -> TextRegion {
        TextRegion {
            bbox: BoundingBox::new(x, 2, 6, 4),
            text: text.to_string(),
            confidence,
        }
    }

    fn config_with(pairs: &[(&str, &str)]) -> Arc<Config> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(
            Config::from_lookup(|key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
                .unwrap(),
        )
    }

    fn orchestrator(
        config: Arc<Config>,
        detector: StubDetector,
        translator: StubTranslator,
        renderer: Arc<RecordingRenderer>,
    ) -> PipelineOrchestrator {
        let detection = DetectionService::new(Arc::new(detector), config.confidence_threshold(), None);
        let components = PipelineComponents {
            detection,
            translator: Arc::new(translator),
            remover: Arc::new(BackgroundFillInpainter::from_config(&config)),
            renderer,
        };
        PipelineOrchestrator::new(config, components, Metrics::new())
    }

    fn no_text() -> StubDetector {
        StubDetector {
            regions: Vec::new(),
            fail_width: None,
        }
    }

    fn translator() -> StubTranslator {
        StubTranslator { fail_on: None }
    }

    fn png(width: u32, height: u32, colour: Rgba<u8>) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(width, height, colour)).unwrap()
    }

    fn input(name: &str, bytes: Vec<u8>, config: &Config) -> InputFile {
        InputFile::from_upload(name, Bytes::from(bytes), config).unwrap()
    }

    fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_no_regions_returns_image_unchanged() {
        let config = config_with(&[]);
        let source = RgbaImage::from_fn(16, 12, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 90, 255]));
        let file = input("page.png", encode_png(&source).unwrap(), &config);
        let pipeline = orchestrator(config, no_text(), translator(), Arc::default());

        let outcome = pipeline.process_file(file).await.unwrap();
        assert_eq!(outcome.bundle.len(), 1);
        let image = &outcome.bundle.images()[0];
        assert_eq!(image.status, ImageStatus::Unchanged);
        assert_eq!(decode_rgba(&image.png).unwrap(), source);
        assert_eq!(outcome.report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_regions_are_never_rendered() {
        let config = config_with(&[("OCR_CONFIDENCE_THRESHOLD", "0.5")]);
        let detector = StubDetector {
            regions: vec![region(2, "keep", 0.9), region(20, "skip", 0.2)],
            fail_width: None,
        };
        let renderer = Arc::new(RecordingRenderer::default());
        let file = input("page.png", png(40, 10, WHITE), &config);
        let pipeline = orchestrator(config, detector, translator(), Arc::clone(&renderer));

        pipeline.process_file(file).await.unwrap();
        let calls = renderer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0][0].text, "AR:keep");
    }

    #[tokio::test]
    async fn test_failed_translation_keeps_original_text_and_geometry() {
        let config = config_with(&[]);
        let regions = vec![region(1, "one", 0.9), region(12, "two", 0.9), region(24, "three", 0.9)];
        let detector = StubDetector {
            regions: regions.clone(),
            fail_width: None,
        };
        let failing = StubTranslator {
            fail_on: Some("two".to_string()),
        };
        let renderer = Arc::new(RecordingRenderer::default());
        let file = input("page.png", png(40, 10, WHITE), &config);
        let pipeline = orchestrator(config, detector, failing, Arc::clone(&renderer));

        let outcome = pipeline.process_file(file).await.unwrap();
        assert_eq!(outcome.report.regions_rendered, 3);
        assert_eq!(outcome.report.regions_untranslated, 1);

        let calls = renderer.calls.lock();
        let rendered = &calls[0];
        assert_eq!(rendered.len(), 3);
        for (original, translated) in regions.iter().zip(rendered) {
            assert_eq!(original.bbox, translated.bbox);
        }
        assert_eq!(rendered[1].text, "two");
        assert!(rendered[1].untranslated);
        assert_eq!(rendered[0].text, "AR:one");
        assert!(!rendered[0].untranslated);
    }

    #[tokio::test]
    async fn test_archive_keeps_images_in_order_and_ignores_other_entries() {
        let config = config_with(&[("WORKER_POOL_SIZE", "3")]);
        let archive = zip_of(&[
            ("001.png", png(11, 5, WHITE)),
            ("notes.txt", b"credits".to_vec()),
            ("002.png", png(12, 5, WHITE)),
            ("thumbs.db", vec![0, 1, 2]),
            ("003.png", png(13, 5, WHITE)),
        ]);
        let file = input("chapter.cbz", archive, &config);
        let pipeline = orchestrator(config, no_text(), translator(), Arc::default());

        let outcome = pipeline.process_file(file).await.unwrap();
        let widths: Vec<u32> = outcome.bundle.images().iter().map(|image| image.width).collect();
        assert_eq!(widths, vec![11, 12, 13]);
        let indices: Vec<usize> = outcome.bundle.images().iter().map(|image| image.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_render_failure_drops_only_that_image() {
        let config = config_with(&[]);
        let archive = zip_of(&[
            ("a.png", png(20, 10, WHITE)),
            ("b.png", png(21, 10, WHITE)),
            ("c.png", png(22, 10, WHITE)),
        ]);
        let detector = StubDetector {
            regions: vec![region(1, "hi", 0.9)],
            fail_width: None,
        };
        let renderer = Arc::new(RecordingRenderer {
            fail_width: Some(21),
            ..Default::default()
        });
        let file = input("pages.zip", archive, &config);
        let pipeline = orchestrator(config, detector, translator(), renderer);

        let outcome = pipeline.process_file(file).await.unwrap();
        let widths: Vec<u32> = outcome.bundle.images().iter().map(|image| image.width).collect();
        assert_eq!(widths, vec![20, 22]);
        assert_eq!(outcome.report.dropped.len(), 1);
        assert_eq!(outcome.report.dropped[0].index, 1);
        assert_eq!(outcome.report.dropped[0].stage, ImageStage::Rendering);
    }

    #[tokio::test]
    async fn test_fail_policy_fails_the_file() {
        let config = config_with(&[("IMAGE_FAILURE_POLICY", "fail")]);
        let archive = zip_of(&[("a.png", png(20, 10, WHITE)), ("b.png", png(21, 10, WHITE))]);
        let detector = StubDetector {
            regions: vec![region(1, "hi", 0.9)],
            fail_width: None,
        };
        let renderer = Arc::new(RecordingRenderer {
            fail_width: Some(21),
            ..Default::default()
        });
        let file = input("pages.zip", archive, &config);
        let pipeline = orchestrator(config, detector, translator(), renderer);

        let err = pipeline.process_file(file).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ImageFailed {
                index: 1,
                stage: "rendering",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_all_images_failing_fails_the_file() {
        let config = config_with(&[]);
        let detector = StubDetector {
            regions: vec![region(1, "hi", 0.9)],
            fail_width: None,
        };
        let renderer = Arc::new(RecordingRenderer {
            fail_width: Some(30),
            ..Default::default()
        });
        let file = input("page.png", png(30, 10, WHITE), &config);
        let pipeline = orchestrator(config, detector, translator(), renderer);

        let err = pipeline.process_file(file).await.unwrap_err();
        assert!(matches!(err, PipelineError::AllImagesFailed { total: 1 }));
        assert_eq!(err.code(), "all_images_failed");
    }

    #[tokio::test]
    async fn test_detection_error_degrades_to_pass_through() {
        let config = config_with(&[]);
        let detector = StubDetector {
            regions: vec![region(1, "hi", 0.9)],
            fail_width: Some(30),
        };
        let file = input("page.png", png(30, 10, WHITE), &config);
        let pipeline = orchestrator(config, detector, translator(), Arc::default());

        let outcome = pipeline.process_file(file).await.unwrap();
        assert_eq!(outcome.bundle.images()[0].status, ImageStatus::Unchanged);
        assert_eq!(pipeline.metrics.snapshot().detection_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_corrupt_container_is_fatal() {
        let config = config_with(&[]);
        let file = input("pages.zip", b"PK\x03\x04 truncated".to_vec(), &config);
        let pipeline = orchestrator(config, no_text(), translator(), Arc::default());

        let err = pipeline.process_file(file).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_empty_archive_is_fatal() {
        let config = config_with(&[]);
        let archive = zip_of(&[("readme.txt", b"nothing here".to_vec())]);
        let file = input("pages.zip", archive, &config);
        let pipeline = orchestrator(config, no_text(), translator(), Arc::default());

        let err = pipeline.process_file(file).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::EmptyArchive)));
    }

    #[test]
    fn test_health_reports_detector() {
        let config = config_with(&[]);
        let detection = DetectionService::new(
            Arc::new(crate::services::detection::FallbackRegionDetector),
            0.3,
            None,
        );
        let components = PipelineComponents {
            detection,
            translator: Arc::new(translator()),
            remover: Arc::new(BackgroundFillInpainter::from_config(&config)),
            renderer: Arc::new(RecordingRenderer::default()),
        };
        let pipeline = PipelineOrchestrator::new(config, components, Metrics::new());

        let health = pipeline.health();
        assert!(!health.ocr_available);
        assert_eq!(health.detector, "fallback");
        assert_eq!(health.status, "degraded");
    }

    #[tokio::test]
    async fn test_text_free_pdf_yields_one_unchanged_image_per_page() {
        let Some(document) = crate::services::extraction::blank_document(4) else {
            eprintln!("skipping test_text_free_pdf_yields_one_unchanged_image_per_page: pdfium library not found");
            return;
        };
        let config = config_with(&[("PDF_RENDER_DPI", "72")]);
        let components = PipelineComponents {
            detection: DetectionService::new(
                Arc::new(FallbackRegionDetector),
                config.confidence_threshold(),
                None,
            ),
            translator: Arc::new(translator()),
            remover: Arc::new(BackgroundFillInpainter::from_config(&config)),
            renderer: Arc::new(RecordingRenderer::default()),
        };
        let file = input("booklet.pdf", document, &config);
        let pipeline = PipelineOrchestrator::new(config, components, Metrics::new());

        let outcome = pipeline.process_file(file).await.unwrap();
        let images = outcome.bundle.images();
        assert_eq!(images.len(), 4);
        let indices: Vec<usize> = images.iter().map(|image| image.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        for image in images {
            assert_eq!(image.status, ImageStatus::Unchanged);
            assert_eq!((image.width, image.height), (144, 72));
            let pixels = decode_rgba(&image.png).unwrap();
            let first = *pixels.get_pixel(0, 0);
            assert!(pixels.pixels().all(|p| *p == first));
        }
        assert_eq!(outcome.report.total_images, 4);
    }

    #[tokio::test]
    async fn test_detection_and_translation_get_separate_circuits() {
        let font = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fonts/NotoSansArabic.ttf");
        let config = config_with(&[
            ("ARABIC_FONT_PATH", font),
            ("GEMINI_API_KEYS", "key-a,key-b"),
            ("OCR_ENGINE", "gemini"),
            ("TRANSLATION_SERVICE", "gemini"),
        ]);
        let pipeline = PipelineOrchestrator::from_config(config, Metrics::new()).unwrap();

        let health = pipeline.api_health();
        let circuits: Vec<&str> = health.iter().map(|client| client.circuit.name).collect();
        assert_eq!(circuits, vec!["gemini-detection", "gemini-translation"]);
        assert!(health.iter().all(|client| client.total_keys == 2));
        assert!(pipeline.detection_available());
    }

    #[tokio::test]
    async fn test_google_translation_builds_no_translation_client() {
        let font = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fonts/NotoSansArabic.ttf");
        let config = config_with(&[("ARABIC_FONT_PATH", font), ("OCR_ENGINE", "none")]);
        let pipeline = PipelineOrchestrator::from_config(config, Metrics::new()).unwrap();
        assert!(pipeline.api_health().is_empty());
        assert!(!pipeline.detection_available());
    }
}
