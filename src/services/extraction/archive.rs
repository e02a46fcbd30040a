use super::ImageSink;
use crate::core::errors::{ExtractionError, ExtractionResult};
use crate::utils::image_ops::decode_rgba;
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, warn};

/// Entries under these prefixes are metadata written by archivers, never pages
const IGNORED_PREFIXES: &[&str] = &["__MACOSX/"];

fn is_image_entry(name: &str, image_formats: &BTreeSet<String>) -> bool {
    if IGNORED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| image_formats.contains(&ext.to_lowercase()))
        .unwrap_or(false)
}

/// Read an entry whose header claims `declared` bytes, never buffering more
/// than `limit`. `None` means the entry is over the limit, whatever the
/// header said.
fn read_bounded<R: Read>(reader: R, declared: u64, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    if declared > limit as u64 {
        return Ok(None);
    }
    let mut data = Vec::with_capacity(declared as usize);
    reader.take(limit as u64 + 1).read_to_end(&mut data)?;
    if data.len() > limit {
        return Ok(None);
    }
    Ok(Some(data))
}

/// Decode one entry and push it downstream. Undecodable entries are skipped.
fn emit_entry(name: &str, data: &[u8], sink: &mut ImageSink) -> ControlFlow<()> {
    match decode_rgba(data) {
        Ok(image) => sink.emit(image),
        Err(e) => {
            warn!("Skipping archive entry '{}': {}", name, e);
            ControlFlow::Continue(())
        }
    }
}

fn finish(sink: &ImageSink, total_entries: usize) -> ExtractionResult<()> {
    if sink.emitted() == 0 && !sink.is_stopped() {
        return Err(ExtractionError::EmptyArchive);
    }
    debug!(
        "Archive yielded {} images from {} entries",
        sink.emitted(),
        total_entries
    );
    Ok(())
}

/// Zip and cbz, read straight from memory in central-directory order.
pub(super) fn extract_zip(
    bytes: &[u8],
    image_formats: &BTreeSet<String>,
    sink: &mut ImageSink,
) -> ExtractionResult<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::CorruptArchive(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ExtractionError::CorruptArchive(e.to_string()))?;
        if entry.is_dir() || !is_image_entry(entry.name(), image_formats) {
            continue;
        }

        let name = entry.name().to_string();
        let declared = entry.size();
        let data = match read_bounded(&mut entry, declared, sink.max_entry_size()) {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!(
                    "Skipping zip entry '{}': larger than {} bytes (header says {})",
                    name,
                    sink.max_entry_size(),
                    declared
                );
                continue;
            }
            Err(e) => {
                warn!("Skipping unreadable zip entry '{}': {}", name, e);
                continue;
            }
        };
        if emit_entry(&name, &data, sink).is_break() {
            return Ok(());
        }
    }

    finish(sink, archive.len())
}

/// Rar and cbr. The unrar library only opens files on disk, so the upload is
/// spooled to a temp file that is removed when the guard drops.
pub(super) fn extract_rar(
    bytes: &[u8],
    image_formats: &BTreeSet<String>,
    sink: &mut ImageSink,
) -> ExtractionResult<()> {
    let mut spool = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".rar")
        .tempfile()?;
    spool.write_all(bytes)?;
    spool.flush()?;

    let corrupt = |e: unrar::error::UnrarError| ExtractionError::CorruptArchive(e.to_string());

    let mut archive = unrar::Archive::new(spool.path())
        .open_for_processing()
        .map_err(corrupt)?;
    let mut total_entries = 0;

    while let Some(header) = archive.read_header().map_err(corrupt)? {
        total_entries += 1;
        let name = header.entry().filename.to_string_lossy().replace('\\', "/");

        let unpacked = header.entry().unpacked_size;
        let wanted = header.entry().is_file() && is_image_entry(&name, image_formats);

        archive = if wanted && unpacked > sink.max_entry_size() as u64 {
            warn!(
                "Skipping rar entry '{}': {} bytes is over the {} byte limit",
                name,
                unpacked,
                sink.max_entry_size()
            );
            header.skip().map_err(corrupt)?
        } else if wanted {
            let (data, rest) = header.read().map_err(corrupt)?;
            if emit_entry(&name, &data, sink).is_break() {
                return Ok(());
            }
            rest
        } else {
            header.skip().map_err(corrupt)?
        };
    }

    finish(sink, total_entries)
}
