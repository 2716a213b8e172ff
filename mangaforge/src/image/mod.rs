//! Per-page image pipeline: normalise, split, crop, fit and quantize one
//! source page into zero or more device-ready rasters.

mod decode;
mod encode;

pub mod crop;
pub mod transform;
pub mod webtoon;

pub use decode::{dimensions, load};
pub use encode::{compress_to_png, save_png, PngCompression};
pub use transform::Side;

use std::fmt;
use std::path::Path;

use imageproc::image::{DynamicImage, RgbImage};

use crate::config::Tunables;
use crate::device::DeviceProfile;
use crate::error::Result;
use crate::pixel::Classifier;
use crate::similarity::SimilarityFilter;

use crop::AutoCrop;
use webtoon::Segmenter;

/// A transform that could not process its raster, handing it back untouched.
pub struct Rejected {
    image: RgbImage,
    stage: &'static str,
    reason: String,
}

impl Rejected {
    pub fn new(image: RgbImage, stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            image,
            stage,
            reason: reason.into(),
        }
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("dimensions", &self.image.dimensions())
            .field("stage", &self.stage)
            .field("reason", &self.reason)
            .finish()
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: {}", self.stage, self.reason)
    }
}

pub type TransformResult = std::result::Result<RgbImage, Rejected>;

/// Keep going with the untouched raster when a transform gives up.
fn best_effort(result: TransformResult) -> RgbImage {
    result.unwrap_or_else(|rejected| {
        log::warn!("{rejected}, keeping the page as is");
        rejected.into_image()
    })
}

/// Optional steps applied to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversionFlags {
    pub auto_crop: bool,
    pub orient: bool,
    pub resize: bool,
    pub stretch: bool,
    pub quantize: bool,
    pub frame: bool,
    pub webtoon: bool,
    /// Keep only one half of a double-page spread.
    #[serde(skip)]
    pub half: Option<Side>,
}

impl Default for ConversionFlags {
    fn default() -> Self {
        Self {
            auto_crop: true,
            orient: true,
            resize: true,
            stretch: false,
            quantize: true,
            frame: false,
            webtoon: false,
            half: None,
        }
    }
}

impl ConversionFlags {
    pub fn with_half(self, half: Option<Side>) -> Self {
        Self { half, ..self }
    }
}

/// Strips taller than four times their width are treated as webtoons.
pub fn is_webtoon_page(width: u32, height: u32) -> bool {
    height as u64 > 4 * width as u64
}

/// Converts source pages for one device.
pub struct PageConverter<'a> {
    device: &'a DeviceProfile,
    tunables: &'a Tunables,
    filter: &'a SimilarityFilter,
}

impl<'a> PageConverter<'a> {
    pub fn new(
        device: &'a DeviceProfile,
        tunables: &'a Tunables,
        filter: &'a SimilarityFilter,
    ) -> Self {
        Self {
            device,
            tunables,
            filter,
        }
    }

    /// Decode `source` and run it through the pipeline. A landscape spread
    /// is cut into the given halves in order; portrait pages stay whole.
    ///
    /// Only a decode failure is an error; every later step degrades to
    /// passing the raster through.
    pub fn convert(
        &self,
        source: &Path,
        flags: &ConversionFlags,
        halves: &[Side],
    ) -> Result<Vec<RgbImage>> {
        let img = load(source)?;
        log::debug!(
            "Converting {} ({}x{})",
            source.display(),
            img.width(),
            img.height()
        );

        if halves.is_empty() || flags.webtoon {
            return Ok(self.convert_image(img, flags));
        }
        if img.width() <= img.height() {
            log::debug!("{} is not a spread, keeping it whole", source.display());
            return Ok(self.convert_image(img, &flags.with_half(None)));
        }
        Ok(halves
            .iter()
            .flat_map(|&side| self.convert_image(img.clone(), &flags.with_half(Some(side))))
            .collect())
    }

    pub fn convert_image(&self, img: DynamicImage, flags: &ConversionFlags) -> Vec<RgbImage> {
        let img = transform::to_rgb(img);
        if flags.webtoon {
            self.convert_webtoon(img, flags)
        } else {
            vec![self.convert_single(img, flags)]
        }
    }

    fn convert_webtoon(&self, img: RgbImage, flags: &ConversionFlags) -> Vec<RgbImage> {
        let segmenter = Segmenter::new(
            self.tunables.webtoon,
            Classifier::new(self.tunables.classifier),
            AutoCrop::new(self.tunables.crop),
            self.filter,
        );
        let (width, height) = self.device.dimensions();

        segmenter
            .segment(img)
            .into_iter()
            .map(|panel| {
                let panel = if flags.stretch {
                    best_effort(transform::stretch_fit(panel, width, height))
                } else if flags.resize {
                    best_effort(transform::resize_fit(panel, width, height))
                } else {
                    panel
                };
                self.finish(panel, flags)
            })
            .collect()
    }

    fn convert_single(&self, img: RgbImage, flags: &ConversionFlags) -> RgbImage {
        let (width, height) = self.device.dimensions();
        let mut img = img;

        if let Some(side) = flags.half {
            img = best_effort(transform::split_half(img, side));
        }
        if flags.auto_crop {
            img = best_effort(AutoCrop::new(self.tunables.crop).crop(img));
        }
        if flags.orient {
            img = best_effort(transform::orient(img, width, height));
        }
        if flags.stretch {
            img = best_effort(transform::stretch_fit(img, width, height));
        } else if flags.resize {
            img = best_effort(transform::resize_fit(img, width, height));
        }
        if flags.frame {
            img = best_effort(transform::frame(
                img,
                self.device.foreground(),
                self.device.background(),
                width,
                height,
            ));
        }
        self.finish(img, flags)
    }

    fn finish(&self, img: RgbImage, flags: &ConversionFlags) -> RgbImage {
        if flags.quantize {
            best_effort(transform::quantize(img, self.device.palette()))
        } else {
            img
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Preset;
    use imageproc::image::Rgb;

    #[test]
    fn best_effort_hands_back_the_input() {
        let img = RgbImage::from_pixel(1, 4, Rgb([9, 9, 9]));
        let out = best_effort(transform::split_half(img.clone(), Side::Right));
        assert_eq!(out, img);
    }

    #[test]
    fn rejected_debug_omits_pixels() {
        let rejected = Rejected::new(RgbImage::new(3, 2), "frame", "no room");
        let debug = format!("{rejected:?}");
        assert!(debug.contains("(3, 2)") && debug.contains("no room"));
        assert_eq!(rejected.to_string(), "frame skipped: no room");
    }

    #[test]
    fn webtoon_ratio() {
        assert!(is_webtoon_page(100, 401));
        assert!(!is_webtoon_page(100, 400));
    }

    #[test]
    fn half_split_happens_before_crop() {
        let device = Preset::KoboGlo.profile();
        let tunables = Tunables::default();
        let filter = SimilarityFilter::disabled();
        let converter = PageConverter::new(&device, &tunables, &filter);

        // black left half, white right half with a small grey mark
        let mut spread = RgbImage::from_fn(400, 300, |x, _| {
            if x < 200 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        for y in 100..140 {
            for x in 300..330 {
                spread.put_pixel(x, y, Rgb([136, 136, 136]));
            }
        }

        let flags = ConversionFlags {
            orient: false,
            resize: false,
            quantize: false,
            ..Default::default()
        };
        let right = converter.convert_image(
            DynamicImage::ImageRgb8(spread.clone()),
            &flags.with_half(Some(Side::Right)),
        );
        assert_eq!(right.len(), 1);
        assert_eq!(right[0].dimensions(), (30, 40));

        let left = converter.convert_image(
            DynamicImage::ImageRgb8(spread),
            &flags.with_half(Some(Side::Left)),
        );
        assert_eq!(left[0].dimensions(), (200, 300));
    }

    #[test]
    fn frame_fills_the_device() {
        let device = Preset::Kindle1.profile();
        let tunables = Tunables::default();
        let filter = SimilarityFilter::disabled();
        let converter = PageConverter::new(&device, &tunables, &filter);

        let flags = ConversionFlags {
            auto_crop: false,
            frame: true,
            ..Default::default()
        };
        let page = RgbImage::from_pixel(300, 500, Rgb([120, 120, 120]));
        let out = converter.convert_image(DynamicImage::ImageRgb8(page), &flags);
        assert_eq!(out[0].dimensions(), (600, 800));
        assert!(out[0].pixels().all(|p| device.palette().contains(p)));
    }
}
