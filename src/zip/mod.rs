//! Streaming ZIP archive writing, plus the reader side used to verify it.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records, written and parsed
//! - `accumulator`: running CRC-32 and byte counts for one entry
//! - `header`: local file headers and data descriptors
//! - `central`: central directory and end-of-archive records
//! - `assembler`: the per-entry state machine tying them together
//! - `parser` and `verifier`: read a finished archive back and check it
//!
//! ## Layout written
//!
//! 1. For each entry: local file header, entry data, and a data descriptor
//!    when the sizes were not known as the header was written
//! 2. Central directory, one record per entry in input order
//! 3. ZIP64 end record and locator, when any limit of the classic format
//!    is reached
//! 4. End of central directory record
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE entries
//! - ZIP64 for large entries, far offsets and more than 65534 entries
//! - UTF-8 file names
//!
//! ## Limitations
//!
//! - No encryption, comments, or multi-disk archives

mod accumulator;
mod assembler;
mod central;
mod entry;
mod header;
mod parser;
pub mod structures;
mod verifier;

pub use accumulator::{EntryAccumulator, EntryTotals};
pub use assembler::{EntryState, ZipAssembler, create_zip};
pub use central::{CentralDirectoryBuilder, CentralDirectoryRecord, EndOfArchiveRecord};
pub use entry::{ZipEntry, validate_path};
pub use header::{HeaderPlan, Sizes, deflate_bound, write_data_descriptor, write_local_header};
pub use parser::{DirectoryLocation, LocalHeader, ZipParser};
pub use structures::{CompressionMethod, DosDateTime, ZipFileEntry};
pub use verifier::{VerifyReport, ZipVerifier};
