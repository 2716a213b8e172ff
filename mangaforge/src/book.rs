//! Page list assembly: chapters, natural ordering, duplicate removal and the
//! guesses made from a freshly scanned directory.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use rand::seq::IndexedRandom;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::image::{self as img, is_webtoon_page};
use crate::similarity;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Pages sampled by [`guess_layout`].
pub const LAYOUT_SAMPLE: usize = 20;

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Natural order that ignores case, so `page2` sorts before `page10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b)
}

/// Compare paths component by component in natural order.
fn path_cmp(a: &Path, b: &Path) -> Ordering {
    let mut a = a.components();
    let mut b = b.components();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let x = x.as_os_str().to_string_lossy();
                let y = y.as_os_str().to_string_lossy();
                let order = natural_cmp(&x, &y);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    name: String,
    pages: Vec<PathBuf>,
}

impl Chapter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }
}

/// A page list still being edited.
#[derive(Debug, Clone, Default)]
pub struct Book {
    chapters: Vec<Chapter>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from a directory. Images directly inside `root` form a
    /// chapter named after it; every sub-directory is a chapter holding all
    /// images beneath it.
    pub fn scan(root: &Path) -> Result<Self> {
        fs::metadata(root).map_err(|e| Error::io(root, e))?;

        let root_name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        let mut book = Book::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if entry.file_type().is_dir() {
                book.add_directory(path);
            } else if is_image_file(path) {
                book.add_page(path, &root_name);
            }
        }

        log::info!(
            "Scanned {}: {} pages in {} chapters",
            root.display(),
            book.page_count(),
            book.chapters.len()
        );
        Ok(book)
    }

    /// Add every image under `dir` as a chapter named after the directory.
    pub fn add_directory(&mut self, dir: &Path) {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        self.add_chapter(&name);

        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                self.add_page(entry.path(), &name);
            }
        }
    }

    pub fn add_chapter(&mut self, name: &str) {
        if !self.chapters.iter().any(|c| c.name == name) {
            self.chapters.push(Chapter {
                name: name.to_string(),
                pages: Vec::new(),
            });
        }
    }

    pub fn add_page(&mut self, path: impl Into<PathBuf>, chapter: &str) {
        self.add_chapter(chapter);
        if let Some(c) = self.chapters.iter_mut().find(|c| c.name == chapter) {
            c.pages.push(path.into());
        }
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter_names(&self) -> Vec<&str> {
        self.chapters.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn page_count(&self) -> usize {
        self.chapters.iter().map(|c| c.pages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.page_count() == 0
    }

    pub fn pages(&self) -> impl Iterator<Item = &PathBuf> {
        self.chapters.iter().flat_map(|c| c.pages.iter())
    }

    /// Natural order for chapters and for the pages inside each one; a path
    /// listed twice in a chapter is kept once.
    pub fn sort(&mut self) {
        self.chapters.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        for chapter in &mut self.chapters {
            chapter.pages.sort_by(|a, b| path_cmp(a, b));
            chapter.pages.dedup();
        }
    }

    /// Drop byte-identical files, keeping the first copy. Returns how many
    /// pages were removed.
    pub fn remove_duplicates(&mut self) -> Result<usize> {
        let all: Vec<PathBuf> = self.pages().cloned().collect();
        let mut kept: HashSet<PathBuf> = similarity::dedupe_exact(&all)?.into_iter().collect();

        for chapter in &mut self.chapters {
            chapter.pages.retain(|p| kept.remove(p));
        }
        Ok(all.len() - self.page_count())
    }

    /// Stop editing: number the pages and drop empty chapters.
    pub fn freeze(self) -> PageList {
        let mut records = Vec::with_capacity(self.page_count());
        for chapter in self.chapters {
            let name: Arc<str> = chapter.name.into();
            for source in chapter.pages {
                records.push(PageRecord {
                    index: records.len(),
                    source,
                    chapter: name.clone(),
                });
            }
        }
        PageList { records }
    }
}

/// One source page admitted to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub source: PathBuf,
    pub chapter: Arc<str>,
    pub index: usize,
}

/// The frozen, numbered page list a conversion runs over.
#[derive(Debug, Clone, Default)]
pub struct PageList {
    records: Vec<PageRecord>,
}

impl PageList {
    pub fn records(&self) -> &[PageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.records.iter().map(|r| r.source.clone()).collect()
    }

    /// Chapter names in order, each once.
    pub fn chapter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for record in &self.records {
            if names.last() != Some(&&*record.chapter) {
                names.push(&record.chapter);
            }
        }
        names
    }
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

static BRACKETS: LazyLock<Regex> = LazyLock::new(|| regex(r"\[.*?\]"));
static PARENS: LazyLock<Regex> = LazyLock::new(|| regex(r"\(.*?\)"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| regex(r"\s+"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| regex(r"\d+"));

/// Volume markers tried in order; everything from the marker on is dropped.
static VOLUME_MARKERS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?i)\sT\d+.*",
        r"(?i)\sTome\s*\d+.*",
        r"\s*\d+$",
        r"\s*\d+.*",
    ]
    .map(regex)
});

fn base_title(name: &str) -> String {
    VOLUME_MARKERS
        .iter()
        .map(|marker| marker.replace(name, "").trim().to_string())
        .find(|base| base != name)
        .unwrap_or_default()
}

/// Compact title for a run of volume directories, e.g. `Title T1`,
/// `Title T2` gives `Title -- 1-2`.
///
/// A single name is returned as is. Names that do not share a base title
/// give an empty string.
pub fn guess_title(chapter_names: &[&str]) -> String {
    let mut unique: Vec<&str> = chapter_names.to_vec();
    unique.sort_unstable();
    unique.dedup();

    match unique.as_slice() {
        [] => return String::new(),
        [only] => return only.to_string(),
        _ => {}
    }

    let cleaned: Vec<String> = unique
        .iter()
        .map(|name| {
            let name = BRACKETS.replace_all(&PARENS.replace_all(name, ""), "").into_owned();
            let name = name.replace(['_', '.'], " ").replace(['-', '#', '%'], "");
            SPACES.replace_all(name.trim(), " ").into_owned()
        })
        .collect();

    let mut base = String::new();
    for name in &cleaned {
        let candidate = base_title(name);
        if base.is_empty() {
            base = candidate;
        } else if base != candidate {
            log::debug!("No common title: {base:?} != {candidate:?}");
            return String::new();
        }
    }
    if base.is_empty() {
        return String::new();
    }

    let volumes: Vec<u64> = cleaned
        .iter()
        .filter_map(|name| DIGITS.find(name)?.as_str().parse().ok())
        .collect();
    match (volumes.iter().min(), volumes.iter().max()) {
        (Some(min), Some(max)) if min == max => format!("{base} -- {min}"),
        (Some(min), Some(max)) => format!("{base} -- {min}-{max}"),
        _ => base,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    DoublePage,
    Webtoon,
}

/// Vote on page dimensions: webtoon strips win when they exceed the quorum,
/// then double-page spreads, otherwise single pages.
pub fn layout_of(dimensions: &[(u32, u32)]) -> Layout {
    let quorum = dimensions.len() / 2 + 1;
    let webtoons = dimensions
        .iter()
        .filter(|&&(w, h)| is_webtoon_page(w, h))
        .count();
    if webtoons > quorum {
        return Layout::Webtoon;
    }
    let spreads = dimensions
        .iter()
        .filter(|&&(w, h)| !is_webtoon_page(w, h) && w > h)
        .count();
    if spreads > quorum {
        Layout::DoublePage
    } else {
        Layout::Single
    }
}

/// Guess the layout from a random sample of page headers. Books with fewer
/// than [`LAYOUT_SAMPLE`] pages are not guessed.
pub fn guess_layout(paths: &[PathBuf]) -> Option<Layout> {
    if paths.len() < LAYOUT_SAMPLE {
        return None;
    }
    let dimensions: Vec<(u32, u32)> = paths
        .choose_multiple(&mut rand::rng(), LAYOUT_SAMPLE)
        .filter_map(|path| match img::dimensions(path) {
            Ok(dims) => Some(dims),
            Err(e) => {
                log::warn!("Layout guess skips {}: {e}", path.display());
                None
            }
        })
        .collect();

    let layout = layout_of(&dimensions);
    log::info!("Guessed {layout:?} layout from {} pages", dimensions.len());
    Some(layout)
}
