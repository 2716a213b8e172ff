use std::collections::HashSet;
use std::fs;
use std::path::Path;

use imageproc::image::imageops;
use imageproc::image::{DynamicImage, Rgb, RgbImage};

use mangaforge::book::Book;
use mangaforge::convert::{self, RunContext};
use mangaforge::image::PageConverter;
use mangaforge::{
    ArchiveKind, ConversionFlags, ConversionRequest, DeletedSink, Preset, SimilarityFilter,
    Tunables, UnwantedHashIndex,
};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Four structured 800x1000 panels on a white 1000x6000 strip.
fn panel(kind: usize) -> RgbImage {
    RgbImage::from_fn(800, 1000, |x, y| {
        let dark = match kind {
            0 => x < 400,
            1 => y < 500,
            2 => x * 10 > y * 8,
            _ => (x < 400) != (y < 500),
        };
        if dark {
            Rgb([40, 40, 40])
        } else {
            Rgb([160, 160, 160])
        }
    })
}

fn webtoon_strip() -> RgbImage {
    let mut strip = RgbImage::from_pixel(1000, 6000, WHITE);
    for kind in 0..4 {
        let top = 200 + kind as u32 * 1400;
        imageops::replace(&mut strip, &panel(kind), 100, top as i64);
    }
    strip
}

fn unwanted_filter(dir: &Path, tunables: &Tunables) -> SimilarityFilter {
    panel(3).save(dir.join("credits.png")).unwrap();
    let index = UnwantedHashIndex::load(dir, tunables.similarity.hash_size);
    assert_eq!(index.len(), 1);
    SimilarityFilter::new(index, tunables.similarity)
}

fn colours(img: &RgbImage) -> HashSet<[u8; 3]> {
    img.pixels().map(|p| p.0).collect()
}

#[test]
fn regular_page_fits_the_device() {
    let device = Preset::KoboAuraH2o.profile();
    let tunables = Tunables::default();
    let filter = SimilarityFilter::disabled();
    let converter = PageConverter::new(&device, &tunables, &filter);

    let mut page = RgbImage::from_pixel(1200, 1600, WHITE);
    let art = RgbImage::from_fn(1000, 1400, |x, y| {
        let v = 20 + ((x / 3 + y / 5) % 200) as u8;
        Rgb([v, v / 2, 255 - v])
    });
    imageops::replace(&mut page, &art, 100, 100);

    let frames = converter
        .convert_image(DynamicImage::ImageRgb8(page), &ConversionFlags::default());
    assert_eq!(frames.len(), 1);

    let frame = &frames[0];
    let (width, height) = frame.dimensions();
    assert!(width <= 1080 && height <= 1430, "{width}x{height}");
    assert!(height > width, "portrait pages stay portrait");

    let used = colours(frame);
    assert!(used.len() <= device.palette().len());
    assert!(used.iter().all(|c| device.palette().contains(&Rgb(*c))));
}

#[test]
fn landscape_page_is_rotated_for_a_portrait_device() {
    let device = Preset::KoboAuraH2o.profile();
    let tunables = Tunables::default();
    let filter = SimilarityFilter::disabled();
    let converter = PageConverter::new(&device, &tunables, &filter);

    let page = RgbImage::from_pixel(1600, 1000, Rgb([90, 90, 90]));
    let flags = ConversionFlags {
        auto_crop: false,
        ..Default::default()
    };

    let frames = converter.convert_image(DynamicImage::ImageRgb8(page), &flags);
    let (width, height) = frames[0].dimensions();
    assert!(height > width);
    assert!(width <= 1080 && height <= 1430);
}

#[test]
fn webtoon_drops_the_unwanted_panel() {
    let refs = tempfile::tempdir().unwrap();
    let device = Preset::KoboAuraH2o.profile();
    let tunables = Tunables::default();
    let filter = unwanted_filter(refs.path(), &tunables);
    let converter = PageConverter::new(&device, &tunables, &filter);

    let flags = ConversionFlags {
        webtoon: true,
        ..Default::default()
    };
    let frames = converter.convert_image(DynamicImage::ImageRgb8(webtoon_strip()), &flags);
    assert_eq!(frames.len(), 3);
    for frame in &frames {
        let (width, height) = frame.dimensions();
        assert!(width <= 1080 && height <= 1430);
    }
}

#[test]
fn webtoon_without_references_keeps_every_panel() {
    let device = Preset::KoboAuraH2o.profile();
    let tunables = Tunables::default();
    let filter = SimilarityFilter::disabled();
    let converter = PageConverter::new(&device, &tunables, &filter);

    let flags = ConversionFlags {
        webtoon: true,
        quantize: false,
        resize: false,
        ..Default::default()
    };
    let frames = converter.convert_image(DynamicImage::ImageRgb8(webtoon_strip()), &flags);
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|f| f.dimensions() == (800, 1000)));
    assert_eq!(frames[3], panel(3));
}

#[test]
fn webtoon_run_records_dropped_panels() {
    let src = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    let deleted = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let strip = src.path().join("001.png");
    webtoon_strip().save(&strip).unwrap();

    let tunables = Tunables::default();
    let sink = DeletedSink::prepare(deleted.path()).unwrap();
    let filter = unwanted_filter(refs.path(), &tunables).with_sink(sink);

    let mut book = Book::new();
    book.add_page(strip, "Episode 1");
    let pages = book.freeze();

    let mut request = ConversionRequest::new("Strip", Preset::KoboAuraH2o.profile(), out.path());
    request.flags.webtoon = true;

    let mut ctx = RunContext::new();
    let summary = convert::run(&request, &pages, &filter, &mut ctx).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(filter.sink().map(DeletedSink::count), Some(1));

    let saved: Vec<String> = fs::read_dir(deleted.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].starts_with("unwanted_credits"), "{saved:?}");
}

#[test]
fn kindle_books_are_pdf_with_chapter_bookmarks() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let mut book = Book::new();
    for (chapter, count) in [("Chapter 1", 2), ("Chapter 2", 3)] {
        let dir = src.path().join(chapter);
        fs::create_dir(&dir).unwrap();
        for i in 0..count {
            let path = dir.join(format!("{i}.png"));
            RgbImage::from_fn(300, 400, |x, y| {
                let v = ((x / 10 + y / 10 + i) % 2 * 150) as u8 + 50;
                Rgb([v, v, v])
            })
            .save(&path)
            .unwrap();
            book.add_page(path, chapter);
        }
    }
    let pages = book.freeze();

    let request = ConversionRequest::new("Two Chapters", Preset::Kindle4.profile(), out.path());
    assert_eq!(request.archive, ArchiveKind::Pdf);

    let mut ctx = RunContext::new();
    let summary = convert::run(&request, &pages, &SimilarityFilter::disabled(), &mut ctx).unwrap();
    assert_eq!(summary.frames, 5);
    assert_eq!(summary.output, out.path().join("Two Chapters.pdf"));

    let doc = lopdf::Document::load(&summary.output).unwrap();
    assert_eq!(doc.get_pages().len(), 5);

    let outlines = doc
        .catalog()
        .unwrap()
        .get(b"Outlines")
        .unwrap()
        .as_reference()
        .unwrap();
    let outlines = doc.get_dictionary(outlines).unwrap();
    assert_eq!(outlines.get(b"Count").unwrap().as_i64().unwrap(), 2);
}

#[test]
fn output_directory_is_created() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let nested = out.path().join("books").join("manga");

    let path = src.path().join("1.png");
    RgbImage::from_fn(200, 300, |x, _| Rgb([(x % 200) as u8, 0, 0]))
        .save(&path)
        .unwrap();
    let mut book = Book::new();
    book.add_page(path, "one");

    let mut request = ConversionRequest::new("Nested", Preset::KoboGlo.profile(), &nested);
    request.archive = ArchiveKind::Cbz;
    let summary = convert::run(
        &request,
        &book.freeze(),
        &SimilarityFilter::disabled(),
        &mut RunContext::new(),
    )
    .unwrap();
    assert_eq!(summary.output, nested.join("Nested.cbz"));
    assert!(summary.output.is_file());
}
