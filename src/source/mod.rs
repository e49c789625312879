//! Pull-based chunk sources feeding compressed entry data to the assembler.
//!
//! A [`ChunkSource`] is opened over one entry's raw bytes and yields the
//! bytes that go into the archive, in chunks of any size. Every call to
//! [`pull`](ChunkSource::pull) returns either [`Pull::Data`] (possibly empty,
//! more calls follow) or [`Pull::Done`] exactly once, after which the source
//! must not be pulled again.
//!
//! Chunk boundaries carry no meaning: the archive produced from a source is
//! identical whether the source yields one byte per call or everything at
//! once. [`ByteByByte`] and [`SingleShot`] are the two extremes and exist to
//! demonstrate exactly that.
//!
//! ## Reference adapters
//!
//! - [`DeflateSource`]: raw DEFLATE via `flate2`, natural encoder chunking
//! - [`GzipSource`] + [`GzipMember`]: a gzip backend with its framing stripped
//! - [`ByteByByte`]: re-chunks any source into single bytes
//! - [`SingleShot`]: collapses any source into one chunk

mod encoder;
mod gzip;
mod rechunk;

pub use encoder::{DEFAULT_CHUNK_SIZE, DeflateSource, EncoderSource, GzipSource, StreamEncoder};
pub use gzip::GzipMember;
pub use rechunk::{ByteByByte, SingleShot};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;

/// One step of a chunk source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// More bytes; the slice may be empty.
    Data(Bytes),
    /// The stream is exhausted.
    Done,
}

/// Asynchronous pull-based producer of an entry's archive bytes.
#[async_trait]
pub trait ChunkSource: Send {
    /// Produce the next chunk.
    ///
    /// Calling this again after it returned [`Pull::Done`] is a contract
    /// violation; reference sources answer it with
    /// [`SourceViolation::PulledAfterDone`](crate::SourceViolation).
    async fn pull(&mut self) -> Result<Pull>;
}

#[async_trait]
impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    async fn pull(&mut self) -> Result<Pull> {
        (**self).pull().await
    }
}

/// Opens a chunk source over the raw bytes of one entry.
pub trait ChunkSourceFactory: Send + Sync {
    fn open(&self, data: Bytes) -> Box<dyn ChunkSource>;
}

impl<F, S> ChunkSourceFactory for F
where
    F: Fn(Bytes) -> S + Send + Sync,
    S: ChunkSource + 'static,
{
    fn open(&self, data: Bytes) -> Box<dyn ChunkSource> {
        Box::new(self(data))
    }
}

/// How the built-in factory slices its encoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chunking {
    /// Whatever the encoder produces per step.
    #[default]
    Natural,
    /// One byte per pull.
    ByteByByte,
    /// The whole stream in one pull.
    SingleShot,
}

/// Backend used by the built-in factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Raw DEFLATE.
    #[default]
    Deflate,
    /// gzip member, unwrapped to its DEFLATE body.
    Gzip,
}

/// The built-in DEFLATE-backed factory.
#[derive(Debug, Clone, Copy)]
pub struct DeflateFactory {
    pub level: Compression,
    pub backend: Backend,
    pub chunking: Chunking,
}

impl Default for DeflateFactory {
    fn default() -> Self {
        Self {
            level: Compression::default(),
            backend: Backend::default(),
            chunking: Chunking::default(),
        }
    }
}

impl DeflateFactory {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
            ..Self::default()
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn chunking(mut self, chunking: Chunking) -> Self {
        self.chunking = chunking;
        self
    }
}

impl ChunkSourceFactory for DeflateFactory {
    fn open(&self, data: Bytes) -> Box<dyn ChunkSource> {
        let inner: Box<dyn ChunkSource> = match self.backend {
            Backend::Deflate => Box::new(DeflateSource::new(data, self.level)),
            Backend::Gzip => {
                let crc = crc32fast::hash(&data);
                let size = data.len() as u64;
                let member = GzipMember::new(GzipSource::new(data, self.level));
                Box::new(member.expect_trailer(crc, size))
            }
        };

        match self.chunking {
            Chunking::Natural => inner,
            Chunking::ByteByByte => Box::new(ByteByByte::new(inner)),
            Chunking::SingleShot => Box::new(SingleShot::new(inner)),
        }
    }
}

/// Drain a source into one buffer.
pub async fn collect<S: ChunkSource + ?Sized>(source: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Pull::Data(chunk) = source.pull().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
