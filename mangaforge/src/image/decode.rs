//! Image decoding

use std::path::Path;

use imageproc::image::{DynamicImage, ImageError, ImageReader};

use crate::error::{Error, Result};

/// Decode the image at `path`, trusting its content over its extension.
pub fn load(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(ImageError::IoError)
        .and_then(|reader| reader.with_guessed_format().map_err(ImageError::IoError))
        .and_then(|reader| reader.decode())
        .map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Read only the header to get the pixel dimensions.
pub fn dimensions(path: &Path) -> Result<(u32, u32)> {
    imageproc::image::image_dimensions(path).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}
