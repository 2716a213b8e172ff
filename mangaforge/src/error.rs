use std::path::PathBuf;

use imageproc::image::ImageError;
use thiserror::Error;

/// Errors surfaced by a conversion run.
///
/// `Decode` and `Encode` only ever abort the page they belong to; everything
/// else is fatal for the book being assembled.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("cannot write page frame {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("cannot create directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive write failed for {}: {reason}", path.display())]
    ArchiveWrite { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("page {index} ({}): {source}", path.display())]
    Page {
        index: usize,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("conversion cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Attach the page index and source path to a page-scoped error.
    pub fn in_page(self, index: usize, path: impl Into<PathBuf>) -> Self {
        Self::Page {
            index,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// True for errors that only cost one page; the run carries on.
    pub fn is_page_local(&self) -> bool {
        match self {
            Error::Decode { .. } | Error::Encode { .. } => true,
            Error::Page { source, .. } => source.is_page_local(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_context_keeps_locality() {
        let decode = Error::Encode {
            path: "a.png".into(),
            reason: "disk full".into(),
        }
        .in_page(3, "src/a.jpg");
        assert!(decode.is_page_local());
        assert!(decode.to_string().contains("page 3"));

        let fatal = Error::archive_write("book.cbz", "zip closed").in_page(1, "x.png");
        assert!(!fatal.is_page_local());
    }
}
