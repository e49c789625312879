use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::source::{ChunkSourceFactory, DeflateFactory};

/// Settings for one archive build.
///
/// ```
/// use streamzip::{ArchiveOptions, DeflateFactory, Chunking};
///
/// let options = ArchiveOptions::default()
///     .compress(true)
///     .source(DeflateFactory::new(9).chunking(Chunking::ByteByByte));
/// assert!(options.is_compressed());
/// ```
#[derive(Clone)]
pub struct ArchiveOptions {
    compress: bool,
    modified: Option<NaiveDateTime>,
    zip64: bool,
    source: Arc<dyn ChunkSourceFactory>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compress: true,
            modified: None,
            zip64: true,
            source: Arc::new(DeflateFactory::default()),
        }
    }
}

impl fmt::Debug for ArchiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveOptions")
            .field("compress", &self.compress)
            .field("modified", &self.modified)
            .field("zip64", &self.zip64)
            .finish_non_exhaustive()
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// DEFLATE every entry through the chunk source (true) or store every
    /// entry verbatim (false).
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Timestamp written for every entry. Defaults to the wall-clock time
    /// at the start of the build.
    pub fn modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Allow ZIP64 records. When disabled, a build that would need them
    /// fails with [`ZipError::SizeLimitExceeded`](crate::ZipError).
    pub fn zip64(mut self, zip64: bool) -> Self {
        self.zip64 = zip64;
        self
    }

    /// Factory used to open a chunk source for each compressed entry.
    pub fn source<F: ChunkSourceFactory + 'static>(mut self, factory: F) -> Self {
        self.source = Arc::new(factory);
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    pub fn modified_time(&self) -> Option<NaiveDateTime> {
        self.modified
    }

    pub fn allows_zip64(&self) -> bool {
        self.zip64
    }

    pub fn source_factory(&self) -> &dyn ChunkSourceFactory {
        self.source.as_ref()
    }
}
