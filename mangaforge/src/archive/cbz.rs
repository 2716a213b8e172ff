use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{Error, Result};

/// Streams page frames into a stored (uncompressed) zip.
pub struct CbzWriter {
    path: PathBuf,
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
    entries: usize,
}

impl CbzWriter {
    pub fn create(path: &Path) -> Result<Self> {
        log::info!("Building CBZ: {}", path.display());

        let file = File::create(path).map_err(|e| Error::archive_write(path, e))?;
        // frames are already PNG, deflating them again buys nothing
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        Ok(Self {
            path: path.to_path_buf(),
            zip: ZipWriter::new(file),
            options,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, frame: &Path) -> Result<()> {
        let name = frame
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::archive_write(&self.path, format!("{} has no file name", frame.display()))
            })?;
        let data = fs::read(frame).map_err(|e| {
            Error::archive_write(&self.path, format!("{}: {e}", frame.display()))
        })?;

        self.zip
            .start_file(name, self.options)
            .map_err(|e| Error::archive_write(&self.path, e))?;
        self.zip
            .write_all(&data)
            .map_err(|e| Error::archive_write(&self.path, e))?;

        self.entries += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<PathBuf> {
        self.zip
            .finish()
            .map_err(|e| Error::archive_write(&self.path, e))?;

        log::info!("Created CBZ: {} ({} pages)", self.path.display(), self.entries);
        Ok(self.path)
    }
}
