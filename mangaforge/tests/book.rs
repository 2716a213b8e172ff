use std::fs;
use std::path::{Path, PathBuf};

use imageproc::image::{Rgb, RgbImage};

use mangaforge::book::{self, Book};

fn write_page(path: &Path, shade: u8) {
    RgbImage::from_fn(40, 60, |x, y| Rgb([shade, (x * 4) as u8, (y * 4) as u8]))
        .save(path)
        .unwrap();
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn pages_sort_numerically() {
    let mut book = Book::new();
    for name in ["page2.jpg", "page10.jpg", "page1.jpg"] {
        book.add_page(name, "ch");
    }
    book.sort();
    assert_eq!(
        names(&book.freeze().paths()),
        ["page1.jpg", "page2.jpg", "page10.jpg"]
    );
}

#[test]
fn scanned_volumes_keep_reading_order() {
    let root = tempfile::tempdir().unwrap();
    for (volume, pages) in [("Vol 10", 2), ("Vol 2", 2), ("Vol 1", 1)] {
        let dir = root.path().join(volume).join("scans");
        fs::create_dir_all(&dir).unwrap();
        for i in 0..pages {
            write_page(&dir.join(format!("p{}.png", 11 - i)), i as u8);
        }
    }
    fs::write(root.path().join("notes.txt"), "not a page").unwrap();

    let mut book = Book::scan(root.path()).unwrap();
    book.sort();
    let pages = book.freeze();

    assert_eq!(pages.chapter_names(), ["Vol 1", "Vol 2", "Vol 10"]);
    assert_eq!(pages.len(), 5);
    assert_eq!(
        names(&pages.paths()),
        ["p11.png", "p10.png", "p11.png", "p10.png", "p11.png"]
    );
    let indices: Vec<usize> = pages.records().iter().map(|r| r.index).collect();
    assert_eq!(indices, [0, 1, 2, 3, 4]);
}

#[test]
fn byte_identical_pages_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut book = Book::new();

    // three distinct pages, the second one copied twice
    for (i, shade) in [10u8, 20, 30].into_iter().enumerate() {
        let path = dir.path().join(format!("{i}.png"));
        write_page(&path, shade);
        book.add_page(&path, "ch");
    }
    for copy in ["1-copy.png", "1-again.png"] {
        let path = dir.path().join(copy);
        fs::copy(dir.path().join("1.png"), &path).unwrap();
        book.add_page(&path, "ch");
    }

    assert_eq!(book.remove_duplicates().unwrap(), 2);
    let pages = book.freeze();
    assert_eq!(names(&pages.paths()), ["0.png", "1.png", "2.png"]);
}

#[test]
fn volume_titles_are_compacted() {
    let names = ["[Team] Some Manga T01", "[Team] Some Manga T03", "[Team] Some Manga T02"];
    assert_eq!(book::guess_title(&names), "Some Manga -- 1-3");
}
