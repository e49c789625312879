//! Archive assembly.
//!
//! [`ZipAssembler`] writes entries one at a time into an in-memory buffer.
//! Each entry moves through a fixed sequence of states:
//!
//! ```text
//! Init -> HeaderWritten -> Streaming -> (DescriptorWritten) -> Finalized
//! ```
//!
//! An entry is always finalized before the next one starts, so every local
//! header offset is known when it is written and the central directory can
//! be emitted in a single pass at the end without patching earlier bytes.

use bytes::Bytes;
use tracing::{debug, trace};

use super::accumulator::{EntryAccumulator, EntryTotals};
use super::central::{CentralDirectoryBuilder, CentralDirectoryRecord, EndOfArchiveRecord};
use super::entry::{ZipEntry, validate_path};
use super::header::{HeaderPlan, Sizes, write_data_descriptor, write_local_header};
use super::structures::{CompressionMethod, DosDateTime, ZIP64_THRESHOLD};
use crate::error::{Result, SourceViolation, Stage, ZipError};
use crate::options::ArchiveOptions;
use crate::source::Pull;

/// Lifecycle of the entry currently being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Init,
    HeaderWritten,
    Streaming,
    DescriptorWritten,
    Finalized,
}

impl EntryState {
    fn advance(&mut self, next: EntryState, index: usize) {
        trace!(index, from = ?*self, to = ?next, "entry state");
        *self = next;
    }
}

/// Identifies an entry in error reports.
struct EntryContext<'a> {
    index: usize,
    path: &'a str,
}

impl EntryContext<'_> {
    fn source_error(&self, stage: Stage, err: anyhow::Error) -> ZipError {
        match err.downcast::<SourceViolation>() {
            Ok(violation) => ZipError::ProtocolViolation {
                index: self.index,
                path: self.path.to_string(),
                stage,
                detail: violation.to_string(),
            },
            Err(err) => ZipError::ChunkSource {
                index: self.index,
                path: self.path.to_string(),
                stage,
                source: err.into(),
            },
        }
    }

    fn limit(&self, stage: Stage, what: &'static str) -> ZipError {
        ZipError::SizeLimitExceeded {
            index: Some(self.index),
            path: Some(self.path.to_string()),
            stage,
            what,
        }
    }
}

/// Sequential ZIP writer over an in-memory buffer.
///
/// ## Example
///
/// ```no_run
/// use streamzip::{ArchiveOptions, ZipAssembler, ZipEntry};
///
/// # async fn run() -> streamzip::Result<()> {
/// let mut zip = ZipAssembler::new(ArchiveOptions::default());
/// zip.add_entry(ZipEntry::new("hello.txt", "Hello, World!")).await?;
/// let archive: Vec<u8> = zip.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct ZipAssembler {
    options: ArchiveOptions,
    modified: DosDateTime,
    out: Vec<u8>,
    /// Bytes emitted so far; the offset of the next local header.
    cursor: u64,
    directory: CentralDirectoryBuilder,
}

impl ZipAssembler {
    /// Start an empty archive. The entry timestamp is fixed here, from the
    /// options or from the wall clock.
    pub fn new(options: ArchiveOptions) -> Self {
        let modified = options
            .modified_time()
            .map(|dt| DosDateTime::from_naive(&dt))
            .unwrap_or_else(DosDateTime::now);
        let directory = CentralDirectoryBuilder::new(options.allows_zip64());
        Self {
            options,
            modified,
            out: Vec::new(),
            cursor: 0,
            directory,
        }
    }

    /// Number of entries finalized so far.
    pub fn entry_count(&self) -> usize {
        self.directory.len()
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn records(&self) -> &[CentralDirectoryRecord] {
        self.directory.records()
    }

    /// Write one entry: local header, data, and descriptor if needed.
    ///
    /// On failure the partially written entry is discarded, so the buffer
    /// still ends at the last finalized entry.
    pub async fn add_entry(&mut self, entry: ZipEntry) -> Result<()> {
        let index = self.directory.len();
        let start = self.out.len();
        let result = self.write_entry(index, entry).await;
        if result.is_err() {
            self.out.truncate(start);
            self.cursor = start as u64;
        }
        result
    }

    async fn write_entry(&mut self, index: usize, entry: ZipEntry) -> Result<()> {
        let ZipEntry { path, data } = entry;
        let ctx = EntryContext {
            index,
            path: &path,
        };
        let mut state = EntryState::Init;

        let name = validate_path(&path).map_err(|reason| ZipError::InvalidPath {
            index,
            path: path.clone(),
            reason,
        })?;

        let local_header_offset = self.cursor;

        let plan = if self.options.is_compressed() {
            HeaderPlan::deferred(
                name,
                CompressionMethod::Deflate,
                data.len() as u64,
                self.modified,
            )
        } else {
            let mut acc = EntryAccumulator::new();
            acc.update_stored(&data);
            HeaderPlan::known(name, CompressionMethod::Stored, acc.finalize(), self.modified)
        };
        self.check_header_limits(&ctx, local_header_offset, &plan)?;

        self.cursor += write_local_header(&mut self.out, name, &plan)?;
        state.advance(EntryState::HeaderWritten, index);
        debug!(index, path = %path, offset = local_header_offset, deferred = plan.is_deferred(), "local header written");

        let totals = match plan.sizes {
            Sizes::Known(totals) => {
                state.advance(EntryState::Streaming, index);
                self.out.extend_from_slice(&data);
                self.cursor += data.len() as u64;
                totals
            }
            Sizes::Deferred { zip64 } => {
                state.advance(EntryState::Streaming, index);
                let totals = self.stream(&ctx, data).await?;
                self.check_descriptor_limits(&ctx, &totals)?;
                self.cursor += write_data_descriptor(&mut self.out, &totals, zip64)?;
                state.advance(EntryState::DescriptorWritten, index);
                totals
            }
        };
        debug_assert_eq!(self.cursor, self.out.len() as u64);

        self.directory.push(CentralDirectoryRecord {
            name: path.clone(),
            flags: plan.flags,
            method: plan.method,
            version_needed: plan.version_needed,
            modified: plan.modified,
            totals,
            local_header_offset,
        });
        state.advance(EntryState::Finalized, index);
        debug!(
            index,
            path = %path,
            ?state,
            crc32 = totals.crc32,
            compressed = totals.compressed_size,
            uncompressed = totals.uncompressed_size,
            "entry finalized"
        );

        Ok(())
    }

    /// Without ZIP64, the header offset and the predicted sizes must fit the
    /// classic 32-bit fields.
    fn check_header_limits(
        &self,
        ctx: &EntryContext<'_>,
        offset: u64,
        plan: &HeaderPlan,
    ) -> Result<()> {
        if self.options.allows_zip64() {
            return Ok(());
        }
        if offset >= ZIP64_THRESHOLD {
            return Err(ctx.limit(Stage::Header, "local header offset"));
        }
        if plan.is_zip64() {
            return Err(ctx.limit(Stage::Header, "entry size"));
        }
        Ok(())
    }

    /// Without ZIP64, the streamed sizes must fit a 32-bit descriptor.
    fn check_descriptor_limits(&self, ctx: &EntryContext<'_>, totals: &EntryTotals) -> Result<()> {
        if !self.options.allows_zip64()
            && (totals.compressed_size >= ZIP64_THRESHOLD
                || totals.uncompressed_size >= ZIP64_THRESHOLD)
        {
            return Err(ctx.limit(Stage::Descriptor, "entry size"));
        }
        Ok(())
    }

    /// Drain a chunk source for `data` into the output.
    async fn stream(&mut self, ctx: &EntryContext<'_>, data: Bytes) -> Result<EntryTotals> {
        let mut acc = EntryAccumulator::new();
        acc.update_uncompressed(&data);

        let mut source = self.options.source_factory().open(data);
        let mut chunks = 0u64;
        loop {
            let pulled = source
                .pull()
                .await
                .map_err(|err| ctx.source_error(Stage::Streaming, err))?;
            match pulled {
                Pull::Data(chunk) => {
                    chunks += 1;
                    acc.update_compressed(&chunk);
                    trace!(
                        index = ctx.index,
                        chunk = chunks,
                        len = chunk.len(),
                        total = acc.compressed_so_far(),
                        "pulled chunk"
                    );
                    self.out.extend_from_slice(&chunk);
                    self.cursor += chunk.len() as u64;
                }
                Pull::Done => break,
            }
        }

        Ok(acc.finalize())
    }

    /// Write the central directory and end records and return the archive.
    pub fn finish(self) -> Result<Vec<u8>> {
        let (archive, _) = self.finish_with_summary()?;
        Ok(archive)
    }

    /// Like [`finish`](Self::finish), also returning the end record values.
    pub fn finish_with_summary(mut self) -> Result<(Vec<u8>, EndOfArchiveRecord)> {
        let cd_offset = self.cursor;
        let end = self.directory.finish(&mut self.out, cd_offset)?;
        Ok((self.out, end))
    }
}

/// Build a complete archive from `entries`, in order.
///
/// Any failure aborts the whole build; no partial archive is returned.
pub async fn create_zip<I>(entries: I, options: &ArchiveOptions) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = ZipEntry>,
{
    let mut assembler = ZipAssembler::new(options.clone());
    for entry in entries {
        assembler.add_entry(entry).await?;
    }
    assembler.finish()
}
