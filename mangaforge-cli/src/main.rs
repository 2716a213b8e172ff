use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use mangaforge::book::{self, Book, Layout};
use mangaforge::{
    convert, ArchiveKind, ConversionRequest, DeletedSink, PngCompression, Preset, ProgressEvent,
    RunContext, SimilarityFilter, SplitMode, Tunables, UnwantedHashIndex,
};

#[derive(Parser)]
#[command(name = "mangaforge-cli")]
#[command(about = "Turn manga and webtoon pages into e-reader CBZ/PDF books", long_about = None)]
#[command(version)]
struct Args {
    /// Directories or image files, in reading order
    #[arg(value_name = "INPUT", required_unless_present = "list_devices")]
    inputs: Vec<PathBuf>,

    /// Target device
    #[arg(short, long, value_name = "DEVICE", default_value = "Kobo Libra H2O")]
    device: String,

    /// Print the known devices and exit
    #[arg(long, default_value_t)]
    list_devices: bool,

    /// Book title (guessed from the chapter names otherwise)
    #[arg(short, long)]
    title: Option<String>,

    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// How double-page spreads are cut
    #[arg(long, value_enum, default_value_t = SplitArg::Auto)]
    split: SplitArg,

    /// Treat pages as webtoon strips
    #[arg(long, default_value_t, conflicts_with = "no_webtoon")]
    webtoon: bool,

    /// Never treat pages as webtoon strips
    #[arg(long, default_value_t)]
    no_webtoon: bool,

    /// Disable automatic cropping
    #[arg(long, default_value_t)]
    no_auto_crop: bool,

    /// Keep landscape pages landscape
    #[arg(long, default_value_t)]
    no_orient: bool,

    /// Keep the source resolution
    #[arg(long, default_value_t)]
    no_resize: bool,

    /// Fill the screen, ignoring the aspect ratio
    #[arg(long, default_value_t)]
    stretch: bool,

    /// Pad pages to the full screen with a thin border
    #[arg(long, default_value_t)]
    frame: bool,

    /// Keep full colour
    #[arg(long, default_value_t)]
    no_quantize: bool,

    /// Keep byte-identical pages
    #[arg(long, default_value_t)]
    no_dedupe: bool,

    /// Directory of images (ads, credits) to drop from webtoons
    #[arg(long, value_name = "DIR")]
    unwanted: Option<PathBuf>,

    /// Save every dropped panel here
    #[arg(long, value_name = "DIR", requires = "unwanted")]
    deleted: Option<PathBuf>,

    /// JSON file overriding the detection tunables
    #[arg(long, value_name = "FILE")]
    tunables: Option<PathBuf>,

    /// Output container (the device's preference otherwise)
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// PNG compression level of the page frames
    #[arg(long, value_enum, default_value_t = PngCompressionArg::Fast)]
    png_compression: PngCompressionArg,

    /// Verbose output
    #[arg(short, long, default_value_t)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, default_value_t)]
    quiet: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SplitArg {
    None,
    LeftRight,
    RightLeft,
    Auto,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Cbz,
    Pdf,
}

impl From<FormatArg> for ArchiveKind {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Cbz => ArchiveKind::Cbz,
            FormatArg::Pdf => ArchiveKind::Pdf,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PngCompressionArg {
    Fast,
    Default,
    Best,
}

impl From<PngCompressionArg> for PngCompression {
    fn from(arg: PngCompressionArg) -> Self {
        match arg {
            PngCompressionArg::Fast => PngCompression::Fast,
            PngCompressionArg::Default => PngCompression::Default,
            PngCompressionArg::Best => PngCompression::Best,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose, args.quiet);

    if args.list_devices {
        for preset in Preset::iter() {
            let profile = preset.profile();
            let (width, height) = profile.dimensions();
            println!(
                "{:<34} {width}x{height}  {} greys  {}",
                profile.name(),
                profile.palette().len(),
                profile.archive().extension()
            );
        }
        return Ok(());
    }

    let device = Preset::try_from(args.device.as_str())
        .map(Preset::profile)
        .context("Run with --list-devices to see the supported devices")?;

    let tunables = match &args.tunables {
        Some(path) => Tunables::load(path).context("Failed to load tunables")?,
        None => Tunables::default(),
    };

    let pages = collect_pages(&args)?;
    if pages.is_empty() {
        anyhow::bail!("No images found in the given inputs");
    }

    let title = match &args.title {
        Some(title) => title.clone(),
        None => {
            let guess = book::guess_title(&pages.chapter_names());
            if guess.is_empty() {
                "mangaforge".to_string()
            } else {
                guess
            }
        }
    };

    let layout = if (args.webtoon || args.no_webtoon) && args.split != SplitArg::Auto {
        None
    } else {
        book::guess_layout(&pages.paths())
    };
    let webtoon = if args.webtoon {
        true
    } else if args.no_webtoon {
        false
    } else {
        layout == Some(Layout::Webtoon)
    };
    let split = match args.split {
        SplitArg::None => SplitMode::None,
        SplitArg::LeftRight => SplitMode::LeftThenRight,
        SplitArg::RightLeft => SplitMode::RightThenLeft,
        // manga spreads read right to left
        SplitArg::Auto if !webtoon && layout == Some(Layout::DoublePage) => {
            SplitMode::RightThenLeft
        }
        SplitArg::Auto => SplitMode::None,
    };
    if webtoon && split != SplitMode::None {
        anyhow::bail!("Webtoon strips cannot be split into halves");
    }

    let mut request = ConversionRequest::new(title, device, &args.output_dir);
    if let Some(format) = args.format {
        request.archive = format.into();
    }
    request.split = split;
    request.compression = args.png_compression.into();
    request.tunables = tunables;
    request.flags.auto_crop = !args.no_auto_crop;
    request.flags.orient = !args.no_orient;
    request.flags.resize = !args.no_resize;
    request.flags.stretch = args.stretch;
    request.flags.frame = args.frame;
    request.flags.quantize = !args.no_quantize;
    request.flags.webtoon = webtoon;

    let filter = build_filter(&args, &tunables)?;

    log::info!(
        "Converting `{}` for {} ({} pages, {split:?}, webtoon: {webtoon})",
        request.title,
        request.device.name(),
        pages.len()
    );

    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut ctx = RunContext::new().with_progress(tx);
        convert::run(&request, &pages, &filter, &mut ctx)
    });

    for event in rx {
        if !args.quiet {
            render(&event);
        }
    }

    let summary = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Conversion thread panicked"))?
        .context("Conversion failed")?;

    if !args.quiet {
        log::info!(
            "Done: {} ({} frames, {} pages skipped, {:.1}s)",
            summary.output.display(),
            summary.frames,
            summary.skipped,
            summary.elapsed.as_secs_f64()
        );
    }

    Ok(())
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Gather every input into one sorted, de-duplicated page list.
///
/// A single directory is scanned for chapters. With several inputs, each
/// directory becomes one chapter named after it.
fn collect_pages(args: &Args) -> Result<book::PageList> {
    let mut book = Book::new();
    let several = args.inputs.len() > 1;

    for input in &args.inputs {
        if input.is_dir() && several {
            book.add_directory(input);
        } else if input.is_dir() {
            let scanned = Book::scan(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            for chapter in scanned.chapters() {
                for page in chapter.pages() {
                    book.add_page(page.clone(), chapter.name());
                }
            }
        } else if book::is_image_file(input) {
            book.add_page(input.clone(), &chapter_of(input));
        } else if input.exists() {
            anyhow::bail!("Not an image or directory: {}", input.display());
        } else {
            anyhow::bail!("Input does not exist: {}", input.display());
        }
    }

    book.sort();
    if !args.no_dedupe {
        let removed = book
            .remove_duplicates()
            .context("Failed to look for duplicate pages")?;
        if removed > 0 {
            log::info!("Dropped {removed} duplicate pages");
        }
    }

    Ok(book.freeze())
}

/// Loose image files are grouped by the directory holding them.
fn chapter_of(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Pages".to_string())
}

fn build_filter(args: &Args, tunables: &Tunables) -> Result<SimilarityFilter> {
    let Some(dir) = &args.unwanted else {
        return Ok(SimilarityFilter::disabled());
    };

    let index = UnwantedHashIndex::load(dir, tunables.similarity.hash_size);
    if index.is_empty() {
        log::warn!("No usable unwanted images in {}, filtering is off", dir.display());
    }

    let filter = SimilarityFilter::new(index, tunables.similarity);
    match &args.deleted {
        Some(deleted) => {
            let sink = DeletedSink::prepare(deleted)
                .with_context(|| format!("Failed to prepare {}", deleted.display()))?;
            Ok(filter.with_sink(sink))
        }
        None => Ok(filter),
    }
}

fn render(event: &ProgressEvent) {
    match event {
        ProgressEvent::Started { total } => log::info!("Processing {total} pages..."),
        ProgressEvent::Page {
            completed,
            total,
            fraction,
            remaining,
        } => match remaining {
            Some(eta) => log::info!(
                "[{completed}/{total}] {:.0}% (about {}s left)",
                fraction * 100.0,
                eta.as_secs()
            ),
            None => log::info!("[{completed}/{total}] {:.0}%", fraction * 100.0),
        },
        ProgressEvent::PageSkipped { path, reason, .. } => {
            log::warn!("Skipped {}: {reason}", path.display())
        }
        ProgressEvent::Finished { frames, elapsed } => log::debug!(
            "Wrote {frames} frames in {:.1}s",
            elapsed.as_secs_f64()
        ),
    }
}
