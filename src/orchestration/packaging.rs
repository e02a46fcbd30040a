use bytes::Bytes;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::errors::{PackageError, PackageResult};
use crate::core::types::OutputBundle;

pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Response body for one processed file
#[derive(Debug, Clone)]
pub struct PackagedOutput {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

/// One image goes back as `translated_<stem>.png`; two or more are zipped as
/// `translated_<stem>.zip` holding `translated_1.png..translated_N.png` in
/// bundle order.
pub fn package(bundle: &OutputBundle, stem: &str) -> PackageResult<PackagedOutput> {
    match bundle.images() {
        [] => Err(PackageError::EmptyBundle),
        [single] => Ok(PackagedOutput {
            filename: format!("translated_{}.png", stem),
            content_type: PNG_CONTENT_TYPE,
            bytes: single.png.clone(),
        }),
        images => {
            let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

            for (position, image) in images.iter().enumerate() {
                writer.start_file(format!("translated_{}.png", position + 1), options)?;
                writer.write_all(&image.png)?;
            }
            let bytes = writer.finish()?.into_inner();
            debug!("Zipped {} images into {} bytes", images.len(), bytes.len());

            Ok(PackagedOutput {
                filename: format!("translated_{}.zip", stem),
                content_type: ZIP_CONTENT_TYPE,
                bytes: Bytes::from(bytes),
            })
        }
    }
}
