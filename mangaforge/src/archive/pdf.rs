use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::{Error, Result};
use crate::image as img;

/// Builds a PDF with one page per frame, sized to the device screen.
pub struct PdfWriter {
    path: PathBuf,
    title: String,
    device: String,
    width: u32,
    height: u32,
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<ObjectId>,
    pending_chapters: Vec<String>,
    outline: Vec<(String, ObjectId)>,
}

impl PdfWriter {
    pub fn create(path: &Path, title: &str, device: &str, dimensions: (u32, u32)) -> Result<Self> {
        log::info!("Building PDF: {}", path.display());

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        Ok(Self {
            path: path.to_path_buf(),
            title: title.to_string(),
            device: device.to_string(),
            width: dimensions.0,
            height: dimensions.1,
            doc,
            pages_id,
            pages: Vec::new(),
            pending_chapters: Vec::new(),
            outline: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bookmark the next page added under `title`.
    pub fn add_chapter(&mut self, title: &str) {
        self.pending_chapters.push(title.to_string());
    }

    pub fn add(&mut self, frame: &Path) -> Result<()> {
        let image = img::load(frame)
            .map_err(|e| Error::archive_write(&self.path, e))?
            .into_rgb8();
        let (frame_width, frame_height) = image.dimensions();
        if frame_width == 0 || frame_height == 0 {
            return Err(Error::archive_write(
                &self.path,
                format!("{} is empty", frame.display()),
            ));
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(image.as_raw())
            .map_err(|e| Error::archive_write(&self.path, e))?;
        let pixels = encoder
            .finish()
            .map_err(|e| Error::archive_write(&self.path, e))?;

        let image_id = self.doc.add_object(Object::Stream(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => frame_width as i64,
                "Height" => frame_height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            pixels,
        )));

        let content = placement(
            (self.width, self.height),
            (frame_width, frame_height),
            "Im0",
        );
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(dictionary! {}, content.into_bytes())));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(self.width as i64),
                Object::Integer(self.height as i64),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        self.pages.push(page_id);

        for chapter in self.pending_chapters.drain(..) {
            self.outline.push((chapter, page_id));
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        if !self.pending_chapters.is_empty() {
            log::debug!(
                "Dropping {} bookmarks with no pages after them",
                self.pending_chapters.len()
            );
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.pages.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
            "Count" => self.pages.len() as i64,
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        };
        if let Some(outlines_id) = self.write_outline() {
            catalog.set("Outlines", outlines_id);
            catalog.set("PageMode", "UseOutlines");
        }
        let catalog_id = self.doc.add_object(catalog);

        let info_id = self.doc.add_object(dictionary! {
            "Title" => text_string(&self.title),
            "Author" => text_string(&format!("Created by mangaforge for {}", self.device)),
            "Subject" => text_string(&format!("Created by mangaforge for {}", self.device)),
            "Producer" => text_string(concat!("mangaforge ", env!("CARGO_PKG_VERSION"))),
        });

        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);
        self.doc
            .save(&self.path)
            .map_err(|e| Error::archive_write(&self.path, e))?;

        log::info!(
            "Created PDF: {} ({} pages)",
            self.path.display(),
            self.pages.len()
        );
        Ok(self.path)
    }

    fn write_outline(&mut self) -> Option<ObjectId> {
        if self.outline.is_empty() {
            return None;
        }

        let outlines_id = self.doc.new_object_id();
        let ids: Vec<ObjectId> = self
            .outline
            .iter()
            .map(|_| self.doc.new_object_id())
            .collect();

        for (i, (title, page_id)) in self.outline.iter().enumerate() {
            let mut item = dictionary! {
                "Title" => text_string(title),
                "Parent" => outlines_id,
                "Dest" => vec![Object::Reference(*page_id), Object::Name(b"Fit".to_vec())],
            };
            if i > 0 {
                item.set("Prev", ids[i - 1]);
            }
            if let Some(&next) = ids.get(i + 1) {
                item.set("Next", next);
            }
            self.doc.objects.insert(ids[i], Object::Dictionary(item));
        }

        let outlines: Dictionary = dictionary! {
            "Type" => "Outlines",
            "First" => ids[0],
            "Last" => ids[ids.len() - 1],
            "Count" => ids.len() as i64,
        };
        self.doc
            .objects
            .insert(outlines_id, Object::Dictionary(outlines));
        Some(outlines_id)
    }
}

/// Content stream drawing `name` centred on the page, scaled to fit while
/// keeping its aspect ratio.
fn placement(page: (u32, u32), frame: (u32, u32), name: &str) -> String {
    let (page_width, page_height) = (page.0 as f64, page.1 as f64);
    let (frame_width, frame_height) = (frame.0 as f64, frame.1 as f64);

    let scale = (page_width / frame_width).min(page_height / frame_height);
    let width = frame_width * scale;
    let height = frame_height * scale;
    let x = (page_width - width) / 2.0;
    let y = (page_height - height) / 2.0;

    format!("q {width:.2} 0 0 {height:.2} {x:.2} {y:.2} cm /{name} Do Q")
}

/// PDF text string: plain bytes for ASCII, UTF-16BE with a byte order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    let bytes = if text.is_ascii() {
        text.as_bytes().to_vec()
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
        bytes
    };
    Object::String(bytes, StringFormat::Literal)
}
