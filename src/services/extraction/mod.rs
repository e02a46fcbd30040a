// Container extraction: one input file in, an ordered lazy stream of images out
//
// Decoding happens on a blocking thread that feeds a small bounded channel, so
// image N can be processed while image N+1 is still being decoded and at most
// a couple of decoded images wait in memory at any time.

mod archive;
mod pdf;

pub use pdf::pdf_engine_available;

#[cfg(test)]
pub(crate) use pdf::blank_document;

use crate::core::config::{Config, FormatsConfig};
use crate::core::errors::{ExtractionError, ExtractionResult};
use crate::core::types::ExtractedImage;
use crate::utils::image_ops::{bound_dimensions, decode_rgba};
use bytes::Bytes;
use image::RgbaImage;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Decoded images allowed to wait ahead of the consumer
const STREAM_CAPACITY: usize = 2;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Image,
    Pdf,
    Zip,
    Rar,
}

/// Work out how to open a file. Archives are identified by their magic bytes
/// first so a mislabeled `.cbr` that is really a zip still opens.
pub fn resolve_format(
    bytes: &[u8],
    extension: &str,
    formats: &FormatsConfig,
) -> ExtractionResult<ContainerFormat> {
    if formats.is_image_format(extension) {
        return Ok(ContainerFormat::Image);
    }
    if formats.is_pdf_format(extension) {
        return Ok(ContainerFormat::Pdf);
    }
    if !formats.is_archive_format(extension) {
        return Err(ExtractionError::UnsupportedExtension(extension.to_string()));
    }

    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        return Ok(ContainerFormat::Zip);
    }
    if bytes.starts_with(RAR_MAGIC) {
        return Ok(ContainerFormat::Rar);
    }

    match extension.trim_start_matches('.').to_lowercase().as_str() {
        "zip" | "cbz" => Ok(ContainerFormat::Zip),
        "rar" | "cbr" => Ok(ContainerFormat::Rar),
        other => Err(ExtractionError::CorruptArchive(format!(
            "unrecognised archive signature for .{}",
            other
        ))),
    }
}

/// Single-pass, ordered sequence of extracted images.
///
/// Dropping the stream stops the producer at its next send.
pub struct ImageStream {
    format: ContainerFormat,
    rx: mpsc::Receiver<ExtractionResult<ExtractedImage>>,
}

impl ImageStream {
    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    /// Next image in source order. An `Err` item is terminal.
    pub async fn next(&mut self) -> Option<ExtractionResult<ExtractedImage>> {
        self.rx.recv().await
    }
}

/// Start extracting `bytes`. Must be called from within a tokio runtime.
///
/// Errors that can be detected without decoding (unknown extension) are
/// returned directly; everything else arrives as an `Err` item on the stream.
pub fn extract(bytes: Bytes, extension: &str, config: &Config) -> ExtractionResult<ImageStream> {
    let format = resolve_format(&bytes, extension, &config.formats)?;
    let limits = SinkLimits {
        max_images: config.max_batch_size(),
        max_dimension: config.max_image_dimension(),
        max_entry_size: config.max_entry_size(),
    };
    let image_formats = config.formats.image.clone();
    let dpi = config.image.pdf_render_dpi;

    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
    debug!("Extracting {:?} container ({} bytes)", format, bytes.len());

    tokio::task::spawn_blocking(move || {
        let mut sink = ImageSink::new(tx, limits);
        let result = match format {
            ContainerFormat::Image => decode_rgba(&bytes)
                .map_err(ExtractionError::from)
                .map(|image| {
                    let _ = sink.emit(image);
                }),
            ContainerFormat::Pdf => pdf::extract_pdf(&bytes, dpi, &mut sink),
            ContainerFormat::Zip => archive::extract_zip(&bytes, &image_formats, &mut sink),
            ContainerFormat::Rar => archive::extract_rar(&bytes, &image_formats, &mut sink),
        };
        if let Err(e) = result {
            warn!("Extraction of {:?} container failed: {}", format, e);
            sink.fail(e);
        }
    });

    Ok(ImageStream { format, rx })
}

#[derive(Debug, Clone, Copy)]
struct SinkLimits {
    max_images: usize,
    max_dimension: u32,
    max_entry_size: usize,
}

/// Producer side of an ImageStream: assigns indices, bounds size and count.
pub(crate) struct ImageSink {
    tx: mpsc::Sender<ExtractionResult<ExtractedImage>>,
    limits: SinkLimits,
    next_index: usize,
    stopped: bool,
}

impl ImageSink {
    fn new(tx: mpsc::Sender<ExtractionResult<ExtractedImage>>, limits: SinkLimits) -> Self {
        Self {
            tx,
            limits,
            next_index: 0,
            stopped: false,
        }
    }

    pub(crate) fn max_images(&self) -> usize {
        self.limits.max_images
    }

    pub(crate) fn max_entry_size(&self) -> usize {
        self.limits.max_entry_size
    }

    pub(crate) fn emitted(&self) -> usize {
        self.next_index
    }

    /// Hand one decoded image to the consumer. `Break` means stop producing:
    /// the consumer hung up or the per-file image cap was hit.
    pub(crate) fn emit(&mut self, image: RgbaImage) -> ControlFlow<()> {
        if self.stopped {
            return ControlFlow::Break(());
        }
        if self.next_index >= self.limits.max_images {
            self.fail(ExtractionError::TooManyImages {
                limit: self.limits.max_images,
            });
            return ControlFlow::Break(());
        }

        let image = bound_dimensions(image, self.limits.max_dimension);
        let item = ExtractedImage {
            index: self.next_index,
            image,
        };
        self.next_index += 1;

        if self.tx.blocking_send(Ok(item)).is_err() {
            debug!("Image stream consumer dropped, stopping extraction");
            self.stopped = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    pub(crate) fn fail(&mut self, error: ExtractionError) {
        if !self.stopped {
            let _ = self.tx.blocking_send(Err(error));
            self.stopped = true;
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }
}
