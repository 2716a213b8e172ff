//! Tunable constants for the classifier, auto-crop, webtoon segmenter and
//! similarity filter.
//!
//! The defaults were tuned against real scans and webtoon strips. They are
//! exposed so a run can be adjusted with a JSON file instead of a rebuild.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierTunables {
    /// Channel distance from 0 or 255 still counted as "quite" black/white.
    pub quite_tolerance: u8,
    /// Maximum spread between channels for a pixel to count as grey.
    pub grey_tolerance: u8,
}

impl Default for ClassifierTunables {
    fn default() -> Self {
        Self {
            quite_tolerance: 25,
            grey_tolerance: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropTunables {
    /// Below this variance a strip is considered blank.
    pub variance_threshold: f64,
    /// Row step when walking up from the bottom edge.
    pub row_step: u32,
    /// Column step when measuring the extent of a page-number stamp.
    pub column_step: u32,
    /// Stamp width / stamp height above which the wider cut is not trusted.
    pub stamp_ratio_cutoff: f64,
    /// Footer variance / page variance above which the wider cut is not trusted.
    pub variance_ratio_cutoff: f64,
    /// Gaussian sigma of the soft-border pass.
    pub blur_sigma: f32,
    /// Blurred intensity below which a pixel is treated as border.
    pub blur_threshold: u8,
    /// Channel distance from pure white still treated as page background by
    /// the bounding-box pass.
    pub white_tolerance: u8,
}

impl Default for CropTunables {
    fn default() -> Self {
        Self {
            variance_threshold: 5.0,
            row_step: 2,
            column_step: 5,
            stamp_ratio_cutoff: 9.0,
            variance_ratio_cutoff: 0.1,
            blur_sigma: 5.0,
            blur_threshold: 32,
            white_tolerance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebtoonTunables {
    /// Side of the thumbnail used to find the dominant colour.
    pub dominant_sample: u32,
    /// Blank rows needed after content before a box is closed.
    pub min_gap: u32,
    /// Box height after which the first blank row closes it.
    pub soft_box_cap: u32,
    /// Boxes taller than this are searched for a slanted cut.
    pub soft_max_height: u32,
    /// Boxes still taller than this are sliced blindly.
    pub hard_max_height: u32,
    /// No cut is searched closer than this to the top of a block.
    pub search_margin_top: u32,
    /// No cut is searched closer than this to the bottom of a block.
    pub search_margin_bottom: u32,
    /// Largest slant tested, in degrees (exclusive).
    pub max_angle: f64,
    /// Slant increment, in degrees.
    pub angle_step: f64,
    /// Flat panels of the background colour below this variance are dropped.
    pub min_variance: f64,
    /// Panels shorter than this after cropping are dropped.
    pub min_panel_height: u32,
}

impl Default for WebtoonTunables {
    fn default() -> Self {
        Self {
            dominant_sample: 150,
            min_gap: 30,
            soft_box_cap: 1400,
            soft_max_height: 1500,
            hard_max_height: 3000,
            search_margin_top: 500,
            search_margin_bottom: 200,
            max_angle: 2.0,
            angle_step: 0.01,
            min_variance: 1.0,
            min_panel_height: 36,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityTunables {
    /// Side of the average-hash grid, in cells.
    pub hash_size: u32,
    /// Largest Hamming distance still counted as a match.
    pub threshold: u32,
}

impl Default for SimilarityTunables {
    fn default() -> Self {
        Self {
            hash_size: 10,
            threshold: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub classifier: ClassifierTunables,
    pub crop: CropTunables,
    pub webtoon: WebtoonTunables,
    pub similarity: SimilarityTunables,
}

impl Tunables {
    /// Read tunables from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let tunables: Tunables = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        tunables.validate()?;
        log::debug!("Loaded tunables from {}: {tunables:?}", path.display());
        Ok(tunables)
    }

    pub fn validate(&self) -> Result<()> {
        let crop = &self.crop;
        if crop.row_step == 0 || crop.column_step == 0 {
            return Err(Error::Config("crop steps must be positive".into()));
        }
        if crop.blur_sigma <= 0.0 {
            return Err(Error::Config("blur sigma must be positive".into()));
        }

        let toon = &self.webtoon;
        if toon.dominant_sample == 0 {
            return Err(Error::Config("dominant colour sample must be positive".into()));
        }
        if toon.search_margin_top == 0 {
            return Err(Error::Config("cut search top margin must be positive".into()));
        }
        if toon.angle_step <= 0.0 || toon.max_angle < 0.0 {
            return Err(Error::Config("slant search range is empty".into()));
        }
        if toon.hard_max_height == 0 || toon.soft_max_height > toon.hard_max_height {
            return Err(Error::Config(format!(
                "soft maximum height {} must not exceed hard maximum {}",
                toon.soft_max_height, toon.hard_max_height
            )));
        }

        if self.similarity.hash_size == 0 || self.similarity.hash_size > 64 {
            return Err(Error::Config(format!(
                "hash size {} out of range 1..=64",
                self.similarity.hash_size
            )));
        }
        Ok(())
    }
}
