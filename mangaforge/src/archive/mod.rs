//! Output containers. Both writers take page frames in reading order through
//! the same `add` / `add_chapter` / `finish` contract.

mod cbz;
mod pdf;

pub use cbz::CbzWriter;
pub use pdf::PdfWriter;

use std::path::{Path, PathBuf};

use crate::device::{ArchiveKind, DeviceProfile};
use crate::error::Result;

pub enum Archive {
    Cbz(CbzWriter),
    Pdf(PdfWriter),
}

/// `<dir>/<title>.<ext>` for the given archive kind.
pub fn output_path(dir: &Path, title: &str, kind: ArchiveKind) -> PathBuf {
    dir.join(format!("{title}.{}", kind.extension()))
}

impl Archive {
    pub fn create(kind: ArchiveKind, path: &Path, title: &str, device: &DeviceProfile) -> Result<Self> {
        Ok(match kind {
            ArchiveKind::Cbz => Archive::Cbz(CbzWriter::create(path)?),
            ArchiveKind::Pdf => Archive::Pdf(PdfWriter::create(
                path,
                title,
                device.name(),
                device.dimensions(),
            )?),
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            Archive::Cbz(w) => w.path(),
            Archive::Pdf(w) => w.path(),
        }
    }

    pub fn add(&mut self, frame: &Path) -> Result<()> {
        log::trace!("Archiving {}", frame.display());
        match self {
            Archive::Cbz(w) => w.add(frame),
            Archive::Pdf(w) => w.add(frame),
        }
    }

    /// Start a chapter before its first frame. CBZ has no notion of chapters.
    pub fn add_chapter(&mut self, title: &str) -> Result<()> {
        match self {
            Archive::Cbz(_) => {}
            Archive::Pdf(w) => w.add_chapter(title),
        }
        Ok(())
    }

    pub fn finish(self) -> Result<PathBuf> {
        match self {
            Archive::Cbz(w) => w.finish(),
            Archive::Pdf(w) => w.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Preset;
    use crate::image::{save_png, PngCompression};
    use imageproc::image::{Rgb, RgbImage};

    fn frames(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{i:05}.png"));
                let img = RgbImage::from_pixel(60, 80, Rgb([i as u8 * 40, 0, 0]));
                save_png(&img, &path, PngCompression::Fast).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn cbz_stores_frames_by_basename() {
        let dir = tempfile::tempdir().unwrap();
        let device = Preset::KoboGlo.profile();
        let path = output_path(dir.path(), "Book", ArchiveKind::Cbz);

        let mut archive = Archive::create(ArchiveKind::Cbz, &path, "Book", &device).unwrap();
        archive.add_chapter("ignored").unwrap();
        for frame in frames(dir.path(), 3) {
            archive.add(&frame).unwrap();
        }
        let written = archive.finish().unwrap();
        assert_eq!(written, dir.path().join("Book.cbz"));

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&written).unwrap()).unwrap();
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, ["00000.png", "00001.png", "00002.png"]);

        let entry = zip.by_name("00001.png").unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn pdf_has_a_page_per_frame_and_bookmarks() {
        let dir = tempfile::tempdir().unwrap();
        let device = Preset::Kindle1.profile();
        let path = output_path(dir.path(), "Book", ArchiveKind::Pdf);

        let mut archive = Archive::create(ArchiveKind::Pdf, &path, "Book", &device).unwrap();
        let frames = frames(dir.path(), 3);
        archive.add_chapter("One").unwrap();
        archive.add(&frames[0]).unwrap();
        archive.add(&frames[1]).unwrap();
        archive.add_chapter("Two").unwrap();
        archive.add(&frames[2]).unwrap();
        let written = archive.finish().unwrap();

        let doc = lopdf::Document::load(&written).unwrap();
        assert_eq!(doc.get_pages().len(), 3);

        let catalog = doc.catalog().unwrap();
        let outlines = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
        let outlines = doc.get_dictionary(outlines).unwrap();
        assert_eq!(outlines.get(b"Count").unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn unreadable_frame_fails_the_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let device = Preset::Kindle1.profile();
        let path = output_path(dir.path(), "Book", ArchiveKind::Pdf);
        let bogus = dir.path().join("00000.png");
        std::fs::write(&bogus, b"not a png").unwrap();

        let mut archive = Archive::create(ArchiveKind::Pdf, &path, "Book", &device).unwrap();
        assert!(archive.add(&bogus).is_err());
    }
}
