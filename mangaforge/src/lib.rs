pub mod archive;
pub mod book;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod image;
pub mod pixel;
pub mod similarity;

// Re-export commonly used types
pub use book::{Book, Layout, PageList};
pub use config::Tunables;
pub use convert::{CancelToken, ConversionRequest, ProgressEvent, RunContext, SplitMode, Summary};
pub use device::{ArchiveKind, DeviceProfile, Preset};
pub use error::{Error, Result};
pub use image::{ConversionFlags, PngCompression};
pub use similarity::{DeletedSink, SimilarityFilter, UnwantedHashIndex};
