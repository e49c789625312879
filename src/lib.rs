//! # streamzip
//!
//! Builds ZIP archives by streaming each entry's compressed bytes from a
//! pull-based source into an in-memory buffer, in one sequential pass.
//!
//! Local headers are written before the compressed size is known; CRC-32
//! and sizes follow the data in a data descriptor. Entries are written one
//! after another, so every offset is final when it is recorded and the
//! central directory is emitted at the end without seeking back.
//!
//! ## Features
//!
//! - STORED and DEFLATE entries
//! - Pluggable chunk sources: any source can yield one byte or everything
//!   at once per pull, the archive bytes are the same
//! - ZIP64 when sizes, offsets or the entry count overflow the classic
//!   format
//! - Errors name the failing entry and the stage of its lifecycle
//!
//! ## Example
//!
//! ```no_run
//! use streamzip::{ArchiveOptions, ZipEntry, create_zip};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let entries = vec![
//!         ZipEntry::new("hello.txt", "Hello, World!"),
//!         ZipEntry::new("data/raw.bin", vec![0u8, 1, 2, 3]),
//!     ];
//!
//!     let archive = create_zip(entries, &ArchiveOptions::default()).await?;
//!     std::fs::write("out.zip", archive)?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod options;
pub mod source;
pub mod testdata;
pub mod zip;

pub use cli::Cli;
pub use error::{PathError, Result, SourceViolation, Stage, ZipError};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use options::ArchiveOptions;
pub use source::{
    Backend, ByteByByte, ChunkSource, ChunkSourceFactory, Chunking, DeflateFactory,
    DeflateSource, GzipMember, GzipSource, Pull, SingleShot,
};
pub use testdata::TestDataGenerator;
pub use zip::{
    VerifyReport, ZipAssembler, ZipEntry, ZipFileEntry, ZipVerifier, create_zip,
};
