//! Auto-crop: strip the page-number footer, then blank margins, then soft
//! anti-aliased borders.

use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::morphology::erode;

use crate::config::CropTunables;

use super::{Rejected, TransformResult};

/// Inclusive-exclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCrop {
    tunables: CropTunables,
}

impl AutoCrop {
    pub fn new(tunables: CropTunables) -> Self {
        Self { tunables }
    }

    /// Run the footer, bounding-box and blur passes in that order.
    ///
    /// A pass that finds nothing to remove leaves its input as is; a blank
    /// page comes back untouched.
    pub fn crop(&self, img: RgbImage) -> TransformResult {
        if img.width() == 0 || img.height() == 0 {
            return Err(Rejected::new(img, "auto-crop", "empty raster"));
        }
        if self.content_bounds(&img).is_none() {
            log::trace!("auto-crop: blank {}x{} page", img.width(), img.height());
            return Ok(img);
        }

        let footer = self.footer_cut(&img);
        let img = if footer > 0 {
            log::trace!("auto-crop: removing {footer}px footer");
            let (width, height) = img.dimensions();
            imageops::crop_imm(&img, 0, 0, width, height - footer).to_image()
        } else {
            img
        };

        let img = self.bounding_box_crop(img);
        Ok(self.blur_crop(img))
    }

    /// Bounding box of every pixel darker than the page white.
    pub fn content_bounds(&self, img: &RgbImage) -> Option<Bounds> {
        let limit = 255 - self.tunables.white_tolerance;
        bounds_where(img.width(), img.height(), |x, y| {
            let [r, g, b] = img.get_pixel(x, y).0;
            r.min(g).min(b) < limit
        })
    }

    pub fn bounding_box_crop(&self, img: RgbImage) -> RgbImage {
        match self.content_bounds(&img) {
            Some(b) if (b.width, b.height) != img.dimensions() => {
                imageops::crop_imm(&img, b.x, b.y, b.width, b.height).to_image()
            }
            _ => img,
        }
    }

    /// Crop to the region left after blurring the content mask, which drops
    /// faint scanner borders the hard bounding box keeps.
    pub fn blur_crop(&self, img: RgbImage) -> RgbImage {
        let limit = 255 - self.tunables.white_tolerance;
        let grey = imageops::grayscale(&img);
        let mask = GrayImage::from_fn(grey.width(), grey.height(), |x, y| {
            Luma([if grey.get_pixel(x, y)[0] < limit { 255 } else { 0 }])
        });
        // hairlines thinner than 3px do not survive the erosion
        let blurred = gaussian_blur_f32(&erode(&mask, Norm::LInf, 1), self.tunables.blur_sigma);

        let threshold = self.tunables.blur_threshold;
        match bounds_where(blurred.width(), blurred.height(), |x, y| {
            blurred.get_pixel(x, y)[0] >= threshold
        }) {
            Some(b) if (b.width, b.height) != img.dimensions() => {
                imageops::crop_imm(&img, b.x, b.y, b.width, b.height).to_image()
            }
            _ => img,
        }
    }

    /// Rows to drop from the bottom edge to remove a blank footer, possibly
    /// holding a page number.
    ///
    /// Walks up from the bottom edge: `cut1` is where the blank margin ends,
    /// `cut2` where the variance stops growing (the far edge of a stamp) and
    /// `cut3` where content starts again above the stamp. The wide cut is only
    /// trusted when the stamp is small and the footer carries little of the
    /// page's variance.
    pub fn footer_cut(&self, img: &RgbImage) -> u32 {
        let t = &self.tunables;
        let (width, height) = img.dimensions();
        let (w, h) = (width as i64, height as i64);
        let threshold = t.variance_threshold;
        let delta = t.row_step as i64;

        let rows = Prefix::rows(img);
        let page_variance = rows.variance(0, h);
        if page_variance < 2.0 * threshold {
            return 0;
        }
        let bottom = |diff: i64| rows.variance(h - diff.min(h), h);

        let mut diff = delta;
        while bottom(diff) < threshold && diff < h {
            diff += delta;
        }
        diff -= delta;
        let cut1 = diff;

        diff = diff.max(delta);
        let mut previous = bottom(diff);
        diff += delta;
        while bottom(diff) - previous > 0.0 && diff < h / 4 {
            previous = bottom(diff);
            diff += delta;
        }
        diff -= delta;
        let cut2 = diff;

        diff += delta;
        let above_stamp = |diff: i64| rows.variance(h - diff.min(h), h - cut2);
        let baseline = above_stamp(diff);
        while above_stamp(diff) < threshold + baseline && diff < h / 4 {
            diff += delta;
        }
        diff -= delta;
        let cut3 = diff;

        let step = t.column_step as i64;
        let stamp_rows = Prefix::columns(img, (h - cut2).max(0) as u32, height);

        diff = step;
        while stamp_rows.variance(0, diff.min(w)) < threshold && diff < w {
            diff += step;
        }
        let stamp_left = diff - step;

        diff = step;
        while stamp_rows.variance(w - diff.min(w), w) < threshold && diff < w {
            diff += step;
        }
        let stamp_right = w - (diff - step);

        let stamp_height = cut2 - cut1;
        let narrow_stamp = stamp_height > 0
            && (stamp_right - stamp_left) as f64 / stamp_height as f64 <= t.stamp_ratio_cutoff;
        let quiet_footer = rows.variance(h - cut3.min(h), h) / page_variance < t.variance_ratio_cutoff;

        let cut = if cut3 - cut1 > 2 * step
            && narrow_stamp
            && quiet_footer
            && (cut3 as f64) < h as f64 / 4.0 - step as f64
        {
            cut3
        } else {
            cut1
        };
        log::trace!("footer cuts: {cut1}/{cut2}/{cut3}, stamp x {stamp_left}..{stamp_right}, cut {cut}");

        cut.clamp(0, h - 1) as u32
    }
}

/// Prefix sums of first-channel values and their squares over rows or
/// columns, giving the variance of any band in constant time.
struct Prefix {
    sum: Vec<f64>,
    squares: Vec<f64>,
    per_unit: f64,
}

impl Prefix {
    fn rows(img: &RgbImage) -> Self {
        let mut sum = vec![0.0; img.height() as usize + 1];
        let mut squares = vec![0.0; img.height() as usize + 1];
        for (y, row) in img.rows().enumerate() {
            let (s, q) = row.fold((0.0, 0.0), |(s, q), p| {
                let v = p[0] as f64;
                (s + v, q + v * v)
            });
            sum[y + 1] = sum[y] + s;
            squares[y + 1] = squares[y] + q;
        }
        Self {
            sum,
            squares,
            per_unit: img.width() as f64,
        }
    }

    fn columns(img: &RgbImage, top: u32, bottom: u32) -> Self {
        let width = img.width() as usize;
        let mut sum = vec![0.0; width + 1];
        let mut squares = vec![0.0; width + 1];
        for x in 0..width {
            let (s, q) = (top..bottom).fold((0.0, 0.0), |(s, q), y| {
                let v = img.get_pixel(x as u32, y)[0] as f64;
                (s + v, q + v * v)
            });
            sum[x + 1] = sum[x] + s;
            squares[x + 1] = squares[x] + q;
        }
        Self {
            sum,
            squares,
            per_unit: bottom.saturating_sub(top) as f64,
        }
    }

    /// Population variance of units `[from, to)`; an empty band has none.
    fn variance(&self, from: i64, to: i64) -> f64 {
        let last = self.sum.len() as i64 - 1;
        let (from, to) = (from.clamp(0, last) as usize, to.clamp(0, last) as usize);
        if to <= from {
            return 0.0;
        }
        let n = (to - from) as f64 * self.per_unit;
        if n == 0.0 {
            return 0.0;
        }
        let mean = (self.sum[to] - self.sum[from]) / n;
        ((self.squares[to] - self.squares[from]) / n - mean * mean).max(0.0)
    }
}

/// Population variance of the first channel over the whole raster.
pub fn variance(img: &RgbImage) -> f64 {
    Prefix::rows(img).variance(0, img.height() as i64)
}

/// Smallest rectangle holding every pixel for which `hit` is true.
pub(crate) fn bounds_where(
    width: u32,
    height: u32,
    hit: impl Fn(u32, u32) -> bool,
) -> Option<Bounds> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0, 0);
    let mut found = false;

    for y in 0..height {
        for x in 0..width {
            if hit(x, y) {
                found = true;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }
    }

    found.then(|| Bounds {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}
