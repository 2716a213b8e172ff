//! Book assembly: runs every page of a frozen page list through the image
//! pipeline, numbers the resulting frames and feeds them to the archive.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imageproc::image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::archive::{self, Archive};
use crate::book::{PageList, PageRecord};
use crate::config::Tunables;
use crate::device::{ArchiveKind, DeviceProfile};
use crate::error::{Error, Result};
use crate::image::{self as img, ConversionFlags, PageConverter, PngCompression, Side};
use crate::similarity::SimilarityFilter;

/// Pages done before an ETA is worth reporting.
const ETA_MIN_PAGES: usize = 5;

/// How double-page spreads are cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    #[default]
    None,
    LeftThenRight,
    RightThenLeft,
}

impl SplitMode {
    fn order(self) -> &'static [Side] {
        match self {
            SplitMode::None => &[],
            SplitMode::LeftThenRight => &[Side::Left, Side::Right],
            SplitMode::RightThenLeft => &[Side::Right, Side::Left],
        }
    }
}

impl FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SplitMode::None),
            "left-right" => Ok(SplitMode::LeftThenRight),
            "right-left" => Ok(SplitMode::RightThenLeft),
            _ => Err(Error::Config(format!("unknown split mode: {s}"))),
        }
    }
}

/// Everything a run needs to know, fixed before the first page.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub title: String,
    pub device: DeviceProfile,
    pub archive: ArchiveKind,
    pub output_dir: PathBuf,
    pub flags: ConversionFlags,
    pub split: SplitMode,
    pub compression: PngCompression,
    pub tunables: Tunables,
}

impl ConversionRequest {
    /// A request with default flags, writing the device's preferred archive.
    pub fn new(title: impl Into<String>, device: DeviceProfile, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            archive: device.archive(),
            device,
            output_dir: output_dir.into(),
            flags: ConversionFlags::default(),
            split: SplitMode::None,
            compression: PngCompression::default(),
            tunables: Tunables::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Config("book title is empty".into()));
        }
        if self.split != SplitMode::None && self.flags.webtoon {
            return Err(Error::Config(
                "webtoon strips cannot be split into halves".into(),
            ));
        }
        self.tunables.validate()
    }

    /// Title made safe to use as a file name.
    fn file_stem(&self) -> String {
        self.title
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '_',
                c => c,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Converting,
    Writing,
    Closing,
    Done,
    Failed,
}

/// Cooperative cancellation, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    Page {
        completed: usize,
        total: usize,
        fraction: f64,
        remaining: Option<Duration>,
    },
    PageSkipped {
        index: usize,
        path: PathBuf,
        reason: String,
    },
    Finished {
        frames: usize,
        elapsed: Duration,
    },
}

/// Mutable state owned by one run.
#[derive(Debug)]
pub struct RunContext {
    state: RunState,
    next_frame: usize,
    skipped: usize,
    chapter: Option<Arc<str>>,
    started: Instant,
    progress: Option<Sender<ProgressEvent>>,
    cancel: CancelToken,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            next_frame: 0,
            skipped: 0,
            chapter: None,
            started: Instant::now(),
            progress: None,
            cancel: CancelToken::new(),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, tx: Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Frames written so far.
    pub fn frames(&self) -> usize {
        self.next_frame
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn transition(&mut self, to: RunState) {
        log::debug!("Run state {:?} -> {to:?}", self.state);
        self.state = to;
    }

    // receivers may be gone; progress is advisory
    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            tx.send(event).ok();
        }
    }

    fn report_page(&self, completed: usize, total: usize) {
        let remaining = (completed >= ETA_MIN_PAGES && completed < total).then(|| {
            let per_page = self.started.elapsed() / completed as u32;
            per_page * (total - completed) as u32
        });
        self.emit(ProgressEvent::Page {
            completed,
            total,
            fraction: completed as f64 / total as f64,
            remaining,
        });
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub output: PathBuf,
    pub frames: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Convert `pages` into one archive in `request.output_dir`.
///
/// Pages are processed one at a time in list order. A page that cannot be
/// decoded or written is skipped; any other failure aborts the run and
/// deletes the partial archive.
pub fn run(
    request: &ConversionRequest,
    pages: &PageList,
    filter: &SimilarityFilter,
    ctx: &mut RunContext,
) -> Result<Summary> {
    ctx.started = Instant::now();
    ctx.transition(RunState::Running);

    match assemble(request, pages, filter, ctx) {
        Ok(summary) => {
            ctx.transition(RunState::Done);
            ctx.emit(ProgressEvent::Finished {
                frames: summary.frames,
                elapsed: summary.elapsed,
            });
            log::info!(
                "Converted {} pages into {} frames in {:.1}s: {}",
                pages.len(),
                summary.frames,
                summary.elapsed.as_secs_f64(),
                summary.output.display()
            );
            Ok(summary)
        }
        Err(e) => {
            ctx.transition(RunState::Failed);
            log::error!("Conversion of {} failed: {e}", request.title);
            Err(e)
        }
    }
}

fn assemble(
    request: &ConversionRequest,
    pages: &PageList,
    filter: &SimilarityFilter,
    ctx: &mut RunContext,
) -> Result<Summary> {
    request.validate()?;
    if pages.is_empty() {
        return Err(Error::Config(format!("{} has no pages", request.title)));
    }

    let stem = request.file_stem();
    fs::create_dir_all(&request.output_dir).map_err(|source| Error::DirectoryCreate {
        path: request.output_dir.clone(),
        source,
    })?;
    let workdir = tempfile::Builder::new()
        .prefix(&format!("{stem}-"))
        .tempdir_in(&request.output_dir)
        .map_err(|source| Error::DirectoryCreate {
            path: request.output_dir.clone(),
            source,
        })?;

    let path = archive::output_path(&request.output_dir, &stem, request.archive);
    let mut archive = Archive::create(request.archive, &path, &request.title, &request.device)?;

    log::info!(
        "Converting {} pages of {} for {}",
        pages.len(),
        request.title,
        request.device.name()
    );

    if let Err(e) = convert_pages(request, pages, filter, ctx, workdir.path(), &mut archive) {
        drop(archive);
        discard(&path);
        return Err(e);
    }

    ctx.transition(RunState::Closing);
    let output = match archive.finish() {
        Ok(output) => output,
        Err(e) => {
            discard(&path);
            return Err(e);
        }
    };

    let workdir_path = workdir.path().to_path_buf();
    if let Err(e) = workdir.close() {
        log::warn!("Could not remove {}: {e}", workdir_path.display());
    }

    Ok(Summary {
        output,
        frames: ctx.next_frame,
        skipped: ctx.skipped,
        elapsed: ctx.started.elapsed(),
    })
}

fn convert_pages(
    request: &ConversionRequest,
    pages: &PageList,
    filter: &SimilarityFilter,
    ctx: &mut RunContext,
    workdir: &Path,
    archive: &mut Archive,
) -> Result<()> {
    let converter = PageConverter::new(&request.device, &request.tunables, filter);
    let total = pages.len();
    ctx.emit(ProgressEvent::Started { total });

    for (done, record) in pages.records().iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            log::info!("Cancelled after {done} of {total} pages");
            return Err(Error::Cancelled);
        }

        ctx.transition(RunState::Converting);
        log::info!(
            "Page {}/{total}: {}",
            done + 1,
            record.source.display()
        );

        let written = converter
            .convert(&record.source, &request.flags, request.split.order())
            .and_then(|frames| write_frames(request, ctx, workdir, &frames));

        match written {
            Ok(paths) => {
                ctx.transition(RunState::Writing);
                archive_frames(ctx, archive, record, &paths)
                    .map_err(|e| e.in_page(record.index, &record.source))?;
            }
            Err(e) if e.is_page_local() => {
                log::warn!("Skipping page {}: {e}", record.index);
                ctx.skipped += 1;
                ctx.emit(ProgressEvent::PageSkipped {
                    index: record.index,
                    path: record.source.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.in_page(record.index, &record.source)),
        }

        ctx.report_page(done + 1, total);
    }
    Ok(())
}

/// Save frames as consecutive `%05d.png` files. The frame counter only moves
/// once every frame of the page is on disk, so a skipped page leaves no gap.
fn write_frames(
    request: &ConversionRequest,
    ctx: &mut RunContext,
    workdir: &Path,
    frames: &[RgbImage],
) -> Result<Vec<PathBuf>> {
    let paths = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let path = workdir.join(format!("{:05}.png", ctx.next_frame + i));
            img::save_png(frame, &path, request.compression)?;
            Ok(path)
        })
        .collect::<Result<Vec<_>>>()?;

    ctx.next_frame += paths.len();
    Ok(paths)
}

fn archive_frames(
    ctx: &mut RunContext,
    archive: &mut Archive,
    record: &PageRecord,
    frames: &[PathBuf],
) -> Result<()> {
    if frames.is_empty() {
        log::debug!("{} produced no frames", record.source.display());
        return Ok(());
    }

    if ctx.chapter.as_deref() != Some(&*record.chapter) {
        archive.add_chapter(&record.chapter)?;
        ctx.chapter = Some(record.chapter.clone());
    }
    for frame in frames {
        archive.add(frame)?;
    }
    Ok(())
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::info!("Removed partial archive {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove partial archive {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Book;
    use crate::device::Preset;
    use imageproc::image::Rgb;
    use std::sync::mpsc;

    fn page(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x / 8 + y / 8) % 2 * 200) as u8;
            Rgb([v, v, v])
        });
        img.save(&path).unwrap();
        path
    }

    fn request(out: &Path) -> ConversionRequest {
        let mut request = ConversionRequest::new("Test Book", Preset::KoboMini.profile(), out);
        request.flags.auto_crop = false;
        request
    }

    #[test]
    fn split_modes_parse() {
        assert_eq!("left-right".parse::<SplitMode>().unwrap(), SplitMode::LeftThenRight);
        assert_eq!("RIGHT-LEFT".parse::<SplitMode>().unwrap(), SplitMode::RightThenLeft);
        assert!("both".parse::<SplitMode>().is_err());
    }

    #[test]
    fn file_stem_has_no_separators() {
        let request = ConversionRequest::new("a/b: c", Preset::KoboMini.profile(), ".");
        assert_eq!(request.file_stem(), "a_b_ c");
    }

    #[test]
    fn spreads_become_two_frames_and_portraits_one() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut book = Book::new();
        book.add_page(page(src.path(), "01.png", 160, 100), "ch");
        book.add_page(page(src.path(), "02.png", 100, 160), "ch");
        book.add_page(page(src.path(), "03.png", 160, 100), "ch");
        let pages = book.freeze();

        let mut request = request(out.path());
        request.split = SplitMode::RightThenLeft;

        let (tx, rx) = mpsc::channel();
        let mut ctx = RunContext::new().with_progress(tx);
        let summary = run(&request, &pages, &SimilarityFilter::disabled(), &mut ctx).unwrap();

        assert_eq!(summary.frames, 5);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.output, out.path().join("Test Book.cbz"));
        assert_eq!(ctx.state(), RunState::Done);

        let zip = zip::ZipArchive::new(fs::File::open(&summary.output).unwrap()).unwrap();
        let mut names: Vec<&str> = zip.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            ["00000.png", "00001.png", "00002.png", "00003.png", "00004.png"]
        );

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&ProgressEvent::Started { total: 3 }));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Finished { frames: 5, .. })
        ));
        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Page { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 3);
        assert_eq!(fractions[2], 1.0);

        // only the archive is left behind
        let leftovers: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn undecodable_pages_are_skipped() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let broken = src.path().join("02.png");
        fs::write(&broken, b"garbage").unwrap();

        let mut book = Book::new();
        book.add_page(page(src.path(), "01.png", 100, 160), "ch");
        book.add_page(&broken, "ch");
        book.add_page(page(src.path(), "03.png", 100, 160), "ch");
        let pages = book.freeze();

        let (tx, rx) = mpsc::channel();
        let mut ctx = RunContext::new().with_progress(tx);
        let summary =
            run(&request(out.path()), &pages, &SimilarityFilter::disabled(), &mut ctx).unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.skipped, 1);
        assert!(rx.try_iter().any(|e| matches!(
            e,
            ProgressEvent::PageSkipped { index: 1, .. }
        )));
    }

    #[test]
    fn cancelled_run_leaves_no_archive() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut book = Book::new();
        book.add_page(page(src.path(), "01.png", 100, 160), "ch");
        let pages = book.freeze();

        let token = CancelToken::new();
        token.cancel();
        let mut ctx = RunContext::new().with_cancel(token);
        let result = run(&request(out.path()), &pages, &SimilarityFilter::disabled(), &mut ctx);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(ctx.state(), RunState::Failed);
        assert!(!out.path().join("Test Book.cbz").exists());
    }

    #[test]
    fn unusable_output_directory_fails_the_run() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let blocker = out.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let mut book = Book::new();
        book.add_page(page(src.path(), "01.png", 100, 160), "ch");
        let pages = book.freeze();

        let mut ctx = RunContext::new();
        let result = run(
            &request(&blocker.join("books")),
            &pages,
            &SimilarityFilter::disabled(),
            &mut ctx,
        );
        assert!(matches!(result, Err(Error::DirectoryCreate { .. })));
        assert_eq!(ctx.state(), RunState::Failed);
    }

    #[test]
    fn unwritable_archive_fails_the_run_and_cleans_up() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        // a directory where the archive file should go
        fs::create_dir(out.path().join("Test Book.cbz")).unwrap();

        let mut book = Book::new();
        book.add_page(page(src.path(), "01.png", 100, 160), "ch");
        let pages = book.freeze();

        let mut ctx = RunContext::new();
        let result = run(&request(out.path()), &pages, &SimilarityFilter::disabled(), &mut ctx);
        assert!(matches!(result, Err(Error::ArchiveWrite { .. })));
        assert_eq!(ctx.state(), RunState::Failed);

        // the work directory is gone, only the blocking directory is left
        let left: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn lost_frame_is_fatal_and_the_partial_archive_is_removed() {
        let out = tempfile::tempdir().unwrap();
        let path = archive::output_path(out.path(), "Partial", ArchiveKind::Cbz);
        let device = Preset::KoboMini.profile();
        let mut archive = Archive::create(ArchiveKind::Cbz, &path, "Partial", &device).unwrap();

        let mut book = Book::new();
        book.add_page("01.png", "ch");
        let pages = book.freeze();
        let record = &pages.records()[0];

        let mut ctx = RunContext::new();
        let missing = out.path().join("00000.png");
        let err = archive_frames(&mut ctx, &mut archive, record, &[missing]).unwrap_err();
        assert!(matches!(err, Error::ArchiveWrite { .. }));
        assert!(!err.in_page(record.index, &record.source).is_page_local());

        drop(archive);
        assert!(path.exists());
        discard(&path);
        assert!(!path.exists());
    }

    #[test]
    fn empty_book_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new();
        let result = run(
            &request(out.path()),
            &Book::new().freeze(),
            &SimilarityFilter::disabled(),
            &mut ctx,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn eta_needs_a_few_pages() {
        let (tx, rx) = mpsc::channel();
        let ctx = RunContext::new().with_progress(tx);
        ctx.report_page(2, 10);
        ctx.report_page(5, 10);
        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], ProgressEvent::Page { remaining: None, .. }));
        assert!(matches!(events[1], ProgressEvent::Page { remaining: Some(_), .. }));
    }
}
