//! Webtoon segmentation: cut a tall scrolling strip into page-sized panels.
//!
//! Rows made only of background separate candidate boxes. Boxes that are
//! still too tall are searched for a straight or slightly slanted line of
//! background pixels; what cannot be cut that way is sliced at a fixed height.
//! Every candidate is then cropped and filtered before it becomes a panel.

use std::collections::HashMap;

use imageproc::image::{imageops, Rgb, RgbImage};
use rayon::prelude::*;

use crate::config::WebtoonTunables;
use crate::pixel::{Classifier, Tone};
use crate::similarity::SimilarityFilter;

use super::crop::{self, AutoCrop};

/// Where a block is cut in two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutLine {
    Straight(u32),
    /// One row per column.
    Slanted(Vec<u32>),
}

impl CutLine {
    pub fn y_at(&self, x: u32) -> u32 {
        match self {
            CutLine::Straight(y) => *y,
            CutLine::Slanted(ys) => ys[x as usize],
        }
    }

    pub fn top(&self) -> u32 {
        match self {
            CutLine::Straight(y) => *y,
            CutLine::Slanted(ys) => ys.iter().copied().min().unwrap_or(0),
        }
    }

    pub fn bottom(&self) -> u32 {
        match self {
            CutLine::Straight(y) => *y,
            CutLine::Slanted(ys) => ys.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Background flags for every pixel of a raster under one tone.
struct BackgroundMask {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl BackgroundMask {
    fn new(img: &RgbImage, classifier: &Classifier, tone: Tone) -> Self {
        let cells = img
            .as_raw()
            .par_chunks_exact(3)
            .map(|p| classifier.is_background(Rgb([p[0], p[1], p[2]]), tone))
            .collect();
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            cells,
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> bool {
        self.cells[y * self.width + x]
    }

    fn blank_rows(&self) -> Vec<bool> {
        self.cells
            .par_chunks(self.width.max(1))
            .map(|row| row.iter().all(|&background| background))
            .collect()
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|&background| background)
    }
}

/// Half-open row range `[top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBox {
    pub top: u32,
    pub bottom: u32,
}

impl RowBox {
    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

enum BoxState {
    Outside,
    Inside { top: u32, last_content: u32 },
}

/// Group content rows into boxes.
///
/// A box closes on a blank row once the gap since its last content row
/// exceeds `min_gap`, or once the box is taller than `soft_cap`; blank rows
/// inside a panel (gutters around speech bubbles) do not split it.
pub fn group_rows(blank: &[bool], min_gap: u32, soft_cap: u32) -> Vec<RowBox> {
    let mut boxes = Vec::new();
    let mut state = BoxState::Outside;

    for (y, &is_blank) in blank.iter().enumerate() {
        let y = y as u32;
        state = match (state, is_blank) {
            (BoxState::Outside, true) => BoxState::Outside,
            (BoxState::Outside, false) => BoxState::Inside {
                top: y,
                last_content: y,
            },
            (BoxState::Inside { top, .. }, false) => BoxState::Inside {
                top,
                last_content: y,
            },
            (BoxState::Inside { top, last_content }, true) => {
                if y - last_content > min_gap || y - top > soft_cap {
                    boxes.push(RowBox {
                        top,
                        bottom: last_content + 1,
                    });
                    BoxState::Outside
                } else {
                    BoxState::Inside { top, last_content }
                }
            }
        };
    }

    if let BoxState::Inside { top, last_content } = state {
        boxes.push(RowBox {
            top,
            bottom: last_content + 1,
        });
    }
    boxes
}

pub struct Segmenter<'a> {
    tunables: WebtoonTunables,
    classifier: Classifier,
    crop: AutoCrop,
    filter: &'a SimilarityFilter,
}

impl<'a> Segmenter<'a> {
    pub fn new(
        tunables: WebtoonTunables,
        classifier: Classifier,
        crop: AutoCrop,
        filter: &'a SimilarityFilter,
    ) -> Self {
        Self {
            tunables,
            classifier,
            crop,
            filter,
        }
    }

    /// Panels in reading order. An empty list means nothing survived.
    pub fn segment(&self, img: RgbImage) -> Vec<RgbImage> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let tone = self.dominant_tone(&img);
        let mask = BackgroundMask::new(&img, &self.classifier, tone);
        let boxes = group_rows(
            &mask.blank_rows(),
            self.tunables.min_gap,
            self.tunables.soft_box_cap,
        );
        log::debug!(
            "Webtoon {width}x{height} on {tone:?} background: {} boxes",
            boxes.len()
        );

        let panels: Vec<RgbImage> = boxes
            .iter()
            .flat_map(|b| {
                let block = imageops::crop_imm(&img, 0, b.top, width, b.height()).to_image();
                self.split_block(block, tone)
            })
            .filter_map(|candidate| self.accept(candidate, tone))
            .collect();

        log::debug!("Webtoon kept {} panels", panels.len());
        panels
    }

    /// Most frequent colour of a small nearest-neighbour thumbnail decides
    /// the background tone.
    pub fn dominant_tone(&self, img: &RgbImage) -> Tone {
        let side = self.tunables.dominant_sample;
        let thumb = imageops::resize(img, side, side, imageops::FilterType::Nearest);

        let mut counts: HashMap<[u8; 3], u32> = HashMap::new();
        for p in thumb.pixels() {
            *counts.entry(p.0).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by_key(|&(colour, count)| (count, colour))
            .map(|(colour, _)| self.classifier.tone_of(Rgb(colour)))
            .unwrap_or_default()
    }

    /// Cut an over-tall block along background lines, then slice whatever is
    /// still over the hard cap.
    fn split_block(&self, block: RgbImage, tone: Tone) -> Vec<RgbImage> {
        let t = &self.tunables;
        let mut pieces = Vec::new();
        let mut rest = block;

        // every cut removes at least `search_margin_top` rows from the rest
        let max_cuts = rest.height() / t.search_margin_top.max(1) + 1;
        for _ in 0..max_cuts {
            if rest.height() <= t.soft_max_height {
                break;
            }
            let Some(cut) = self.find_cut(&rest, tone) else {
                log::trace!("No cut line in {}px block", rest.height());
                break;
            };
            log::trace!(
                "Cutting {}px block at rows {}..={}",
                rest.height(),
                cut.top(),
                cut.bottom()
            );
            let (upper, lower) = split_at(rest, &cut, tone);
            pieces.push(upper);
            rest = lower;
        }
        pieces.push(rest);

        pieces
            .into_iter()
            .flat_map(|piece| slice_blindly(piece, t.hard_max_height))
            .collect()
    }

    /// First row, from the top, where a line of background pixels crosses the
    /// whole width at one of the tested slants.
    pub fn find_cut(&self, img: &RgbImage, tone: Tone) -> Option<CutLine> {
        self.find_cut_in_mask(&BackgroundMask::new(img, &self.classifier, tone))
    }

    fn find_cut_in_mask(&self, mask: &BackgroundMask) -> Option<CutLine> {
        let t = &self.tunables;
        let (width, height) = (mask.width, mask.height);
        let top = t.search_margin_top as usize;
        let bottom = height.saturating_sub(t.search_margin_bottom as usize);
        if width == 0 || bottom <= top {
            return None;
        }

        let slants = slant_offsets(width, t.max_angle, t.angle_step);

        (top..bottom).into_par_iter().find_map_first(|y| {
            slants.iter().find_map(|offsets| {
                let reach = offsets[width - 1] as usize;
                if y + reach >= height {
                    return None;
                }
                if reach == 0 {
                    let straight = (0..width).all(|x| mask.at(x, y));
                    return straight.then_some(CutLine::Straight(y as u32));
                }

                let falling = (0..width).all(|x| mask.at(x, y + offsets[x] as usize));
                if falling {
                    return Some(CutLine::Slanted(
                        offsets.iter().map(|&o| y as u32 + o).collect(),
                    ));
                }
                let rising = (0..width).all(|x| mask.at(x, y + offsets[width - 1 - x] as usize));
                rising.then(|| {
                    CutLine::Slanted(
                        (0..width)
                            .map(|x| y as u32 + offsets[width - 1 - x])
                            .collect(),
                    )
                })
            })
        })
    }

    /// Apply the panel filters in order; `None` drops the candidate.
    fn accept(&self, candidate: RgbImage, tone: Tone) -> Option<RgbImage> {
        let t = &self.tunables;

        // a flat candidate is only blank when its colour is the background's
        let variance = crop::variance(&candidate);
        let flat = variance < t.min_variance;
        if flat && self.classifier.is_background(mean_colour(&candidate), tone) {
            log::trace!("Dropping near-blank candidate (variance {variance:.2})");
            return None;
        }

        let panel = super::best_effort(self.crop.crop(candidate));
        if panel.height() < t.min_panel_height {
            log::trace!("Dropping {}px high candidate", panel.height());
            return None;
        }
        if !self.filter.is_valid(&panel) {
            return None;
        }
        if BackgroundMask::new(&panel, &self.classifier, tone).is_blank() {
            log::trace!("Dropping monochrome candidate");
            return None;
        }
        Some(panel)
    }
}

fn mean_colour(img: &RgbImage) -> Rgb<u8> {
    let n = (img.width() as u64 * img.height() as u64).max(1);
    let mut sum = [0u64; 3];
    for p in img.pixels() {
        for (acc, &c) in sum.iter_mut().zip(&p.0) {
            *acc += c as u64;
        }
    }
    Rgb(sum.map(|acc| (acc / n) as u8))
}

/// Per-column row offsets for every tested slant, flattest first. Slants
/// that round to the same line are tested once.
fn slant_offsets(width: usize, max_angle: f64, step: f64) -> Vec<Vec<u32>> {
    let mut slants: Vec<Vec<u32>> = Vec::new();
    let mut i = 0u32;
    loop {
        let angle = i as f64 * step;
        if angle >= max_angle - step * 1e-6 {
            break;
        }
        let tan = angle.to_radians().tan();
        let offsets: Vec<u32> = (0..width).map(|x| (x as f64 * tan).round() as u32).collect();
        if slants.last() != Some(&offsets) {
            slants.push(offsets);
        }
        i += 1;
    }
    if slants.is_empty() {
        slants.push(vec![0; width]);
    }
    slants
}

/// Split along `cut`. The upper part gets everything below the line painted
/// over with the background; the lower part everything above it.
fn split_at(img: RgbImage, cut: &CutLine, tone: Tone) -> (RgbImage, RgbImage) {
    let (width, height) = img.dimensions();
    let fill = tone.fill();

    let upper_height = cut.bottom() + 1;
    let mut upper = imageops::crop_imm(&img, 0, 0, width, upper_height).to_image();
    let lower_top = cut.top();
    let mut lower = imageops::crop_imm(&img, 0, lower_top, width, height - lower_top).to_image();

    for x in 0..width {
        let y_cut = cut.y_at(x);
        for y in y_cut + 1..upper_height {
            upper.put_pixel(x, y, fill);
        }
        for y in lower_top..y_cut {
            lower.put_pixel(x, y - lower_top, fill);
        }
    }
    (upper, lower)
}

fn slice_blindly(img: RgbImage, max_height: u32) -> Vec<RgbImage> {
    let (width, height) = img.dimensions();
    if height <= max_height || max_height == 0 {
        return vec![img];
    }
    log::trace!("Slicing {height}px block every {max_height}px");
    (0..height)
        .step_by(max_height as usize)
        .map(|top| {
            let h = max_height.min(height - top);
            imageops::crop_imm(&img, 0, top, width, h).to_image()
        })
        .collect()
}
