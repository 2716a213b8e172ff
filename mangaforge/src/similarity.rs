//! Perceptual and exact duplicate detection.
//!
//! [`SimilarityFilter`] rejects webtoon panels that look like one of the
//! "unwanted" reference images (ads, dividers, credits). [`dedupe_exact`]
//! drops byte-identical source files from a page list.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use imageproc::image::{imageops, GrayImage, RgbImage};
use parking_lot::Mutex;
use rayon::prelude::*;
use sha1::{Digest, Sha1};

use crate::config::SimilarityTunables;
use crate::error::{Error, Result};
use crate::image::{self as img, PngCompression};

/// Average hash: one bit per cell of a `size`x`size` greyscale thumbnail,
/// set where the cell is brighter than the thumbnail's mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHash {
    bits: Vec<u64>,
    len: u32,
}

impl ImageHash {
    pub fn of_rgb(image: &RgbImage, size: u32) -> Self {
        Self::of_luma(&imageops::grayscale(image), size)
    }

    pub fn of_luma(image: &GrayImage, size: u32) -> Self {
        let thumb = imageops::resize(image, size, size, imageops::FilterType::Lanczos3);
        let len = size * size;
        let mean = thumb.pixels().map(|p| p[0] as f64).sum::<f64>() / len.max(1) as f64;

        let mut bits = vec![0u64; (len as usize).div_ceil(64)];
        for (i, p) in thumb.pixels().enumerate() {
            if p[0] as f64 > mean {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Self { bits, len }
    }

    /// Number of differing bits. Hashes of different sizes never match.
    pub fn distance(&self, other: &ImageHash) -> u32 {
        if self.len != other.len {
            return u32::MAX;
        }
        self.bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Hashes of the reference images, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct UnwantedHashIndex {
    entries: Vec<(String, ImageHash)>,
}

impl UnwantedHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every readable image in `dir`.
    ///
    /// Unreadable files are skipped with a warning and a missing directory
    /// gives an empty index: filtering is advisory and never stops a run.
    pub fn load(dir: &Path, hash_size: u32) -> Self {
        let start = std::time::Instant::now();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read unwanted images in {}: {e}", dir.display());
                return Self::default();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let entries: Vec<(String, ImageHash)> = paths
            .par_iter()
            .filter_map(|path| match img::load(path) {
                Ok(image) => {
                    let name = path.file_name()?.to_string_lossy().into_owned();
                    Some((name, ImageHash::of_rgb(&image.to_rgb8(), hash_size)))
                }
                Err(e) => {
                    log::warn!("Skipping unwanted reference: {e}");
                    None
                }
            })
            .collect();

        log::info!(
            "Loaded {} unwanted image hashes from {} in {:.3}s",
            entries.len(),
            dir.display(),
            start.elapsed().as_secs_f64()
        );
        Self { entries }
    }

    pub fn insert(&mut self, name: impl Into<String>, hash: ImageHash) {
        self.entries.push((name.into(), hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First reference within `threshold` of `hash`, with its distance.
    pub fn find_match(&self, hash: &ImageHash, threshold: u32) -> Option<(&str, u32)> {
        self.entries.iter().find_map(|(name, reference)| {
            let distance = hash.distance(reference);
            (distance <= threshold).then_some((name.as_str(), distance))
        })
    }
}

/// Write-only directory receiving every rejected panel for inspection.
#[derive(Debug)]
pub struct DeletedSink {
    dir: PathBuf,
    counter: Mutex<u32>,
}

impl DeletedSink {
    /// Create `dir` if needed and empty it.
    pub fn prepare(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
            let path = entry.map_err(|e| Error::io(dir, e))?.path();
            if path.is_file() {
                fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            }
        }
        log::debug!("Cleaned deleted panels directory {}", dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            counter: Mutex::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn count(&self) -> u32 {
        *self.counter.lock()
    }

    fn record(&self, panel: &RgbImage, reference: &str, distance: u32) {
        let n = {
            let mut counter = self.counter.lock();
            *counter += 1;
            *counter
        };
        let path = self
            .dir
            .join(format!("unwanted_{reference}--diff_{distance}__{n}.png"));
        if let Err(e) = img::save_png(panel, &path, PngCompression::Fast) {
            log::warn!("Cannot keep rejected panel: {e}");
        }
    }
}

/// Rejects panels matching an unwanted reference image.
#[derive(Debug, Default)]
pub struct SimilarityFilter {
    index: UnwantedHashIndex,
    tunables: SimilarityTunables,
    sink: Option<DeletedSink>,
}

impl SimilarityFilter {
    pub fn new(index: UnwantedHashIndex, tunables: SimilarityTunables) -> Self {
        Self {
            index,
            tunables,
            sink: None,
        }
    }

    /// A filter with no references: every panel passes.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: DeletedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn sink(&self) -> Option<&DeletedSink> {
        self.sink.as_ref()
    }

    pub fn is_valid(&self, panel: &RgbImage) -> bool {
        if self.index.is_empty() {
            return true;
        }
        let hash = ImageHash::of_rgb(panel, self.tunables.hash_size);
        match self.index.find_match(&hash, self.tunables.threshold) {
            Some((reference, distance)) => {
                log::info!("Dropping panel similar to {reference} (distance {distance})");
                if let Some(sink) = &self.sink {
                    sink.record(panel, reference, distance);
                }
                false
            }
            None => true,
        }
    }
}

fn sha1_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Keep the first of every group of byte-identical files, in input order.
///
/// Files are bucketed by size first; only files sharing a size are hashed.
pub fn dedupe_exact(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let sizes = paths
        .iter()
        .map(|path| {
            fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| Error::io(path, e))
        })
        .collect::<Result<Vec<u64>>>()?;

    let mut by_size: HashMap<u64, usize> = HashMap::new();
    for size in &sizes {
        *by_size.entry(*size).or_default() += 1;
    }

    let digests: HashMap<usize, String> = paths
        .par_iter()
        .enumerate()
        .filter(|(i, _)| by_size[&sizes[*i]] > 1)
        .map(|(i, path)| sha1_file(path).map(|digest| (i, digest)))
        .collect::<Result<_>>()?;

    let mut seen = HashSet::new();
    let kept: Vec<PathBuf> = paths
        .iter()
        .enumerate()
        .filter(|(i, _)| match digests.get(i) {
            Some(digest) => seen.insert((sizes[*i], digest.as_str())),
            None => true,
        })
        .map(|(_, path)| path.clone())
        .collect();

    if kept.len() != paths.len() {
        log::info!("Removed {} duplicate images", paths.len() - kept.len());
    }
    Ok(kept)
}
