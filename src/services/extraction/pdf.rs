use super::ImageSink;
use crate::core::errors::{ExtractionError, ExtractionResult};
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Bind the pdfium shared library, next to the binary first, then system-wide.
fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
}

/// Startup/health probe for PDF support
pub fn pdf_engine_available() -> bool {
    match bind_pdfium() {
        Ok(_) => true,
        Err(e) => {
            info!("PDF engine not available: {}", e);
            false
        }
    }
}

fn document_error(e: PdfiumError) -> ExtractionError {
    match e {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            ExtractionError::UnsupportedDocument("document is encrypted".to_string())
        }
        other => ExtractionError::UnsupportedDocument(format!("unreadable PDF: {}", other)),
    }
}

/// Rasterize every page at `dpi`, in page order.
pub(super) fn extract_pdf(bytes: &[u8], dpi: u32, sink: &mut ImageSink) -> ExtractionResult<()> {
    let pdfium = bind_pdfium().map_err(|e| ExtractionError::PdfEngineUnavailable(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(document_error)?;

    let pages = document.pages();
    let page_count = pages.len() as usize;
    if page_count == 0 {
        return Err(ExtractionError::UnsupportedDocument(
            "document has no pages".to_string(),
        ));
    }
    if page_count > sink.max_images() {
        return Err(ExtractionError::TooManyImages {
            limit: sink.max_images(),
        });
    }
    debug!("Rendering {} PDF pages at {} dpi", page_count, dpi);

    // PDF user space is 72 units per inch
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    for (number, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractionError::UnsupportedDocument(format!(
                "page {} could not be rendered: {}",
                number + 1,
                e
            ))
        })?;
        let image = bitmap.as_image().to_rgba8();
        if sink.emit(image).is_break() {
            break;
        }
    }

    Ok(())
}

/// Build a PDF of `pages` blank 2x1 inch pages. `None` when pdfium is absent.
#[cfg(test)]
pub(crate) fn blank_document(pages: usize) -> Option<Vec<u8>> {
    let pdfium = bind_pdfium().ok()?;
    let mut document = pdfium.create_new_pdf().ok()?;
    for _ in 0..pages {
        document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::new_custom(
                PdfPoints::new(144.0),
                PdfPoints::new(72.0),
            ))
            .ok()?;
    }
    document.save_to_bytes().ok()
}
