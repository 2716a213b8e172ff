//! Image encoding: PNG page frames

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use imageproc::image::codecs::png::{CompressionType, FilterType, PngEncoder};
use imageproc::image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PngCompression {
    #[default]
    Fast,
    Default,
    Best,
}

/// Compress an image to PNG with the given compression level
pub fn compress_to_png<W>(
    img: &RgbImage,
    writer: W,
    compression: PngCompression,
) -> std::result::Result<(), String>
where
    W: Write,
{
    let compression_type = match compression {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };

    // quantized pages are flat and compress better unfiltered
    let encoder = PngEncoder::new_with_quality(writer, compression_type, FilterType::NoFilter);
    encoder
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| e.to_string())
}

/// Write a page frame to `path`.
pub fn save_png(img: &RgbImage, path: &Path, compression: PngCompression) -> Result<()> {
    let encode_error = |reason: String| Error::Encode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::create(path).map_err(|e| encode_error(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    compress_to_png(img, &mut writer, compression).map_err(encode_error)?;
    writer.flush().map_err(|e| encode_error(e.to_string()))?;

    log::trace!("Encoded {}x{} frame to {}", img.width(), img.height(), path.display());
    Ok(())
}
