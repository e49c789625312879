use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};
use std::io::{self, Write};

use super::{ChunkSource, Pull};
use crate::error::SourceViolation;

/// Input slice fed to the encoder per step, and the output size at which a
/// chunk is handed out.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// A `flate2` write-side encoder that compresses into an in-memory buffer.
pub trait StreamEncoder: Write + Send {
    /// Compressed bytes produced so far and not yet taken.
    fn buffer(&mut self) -> &mut Vec<u8>;

    /// Flush the encoder and write the stream trailer.
    fn finish_stream(&mut self) -> io::Result<()>;
}

impl StreamEncoder for DeflateEncoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }

    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }
}

impl StreamEncoder for GzEncoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }

    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Finished,
    Done,
}

/// Compresses an in-memory payload step by step as it is pulled.
pub struct EncoderSource<E> {
    input: Bytes,
    consumed: usize,
    encoder: E,
    chunk_size: usize,
    state: State,
}

/// Raw DEFLATE chunk source; the default backend.
pub type DeflateSource = EncoderSource<DeflateEncoder<Vec<u8>>>;

/// gzip chunk source. Wrap it in [`GzipMember`](super::GzipMember) before
/// handing it to the assembler.
pub type GzipSource = EncoderSource<GzEncoder<Vec<u8>>>;

impl DeflateSource {
    pub fn new(input: Bytes, level: Compression) -> Self {
        Self::with_encoder(input, DeflateEncoder::new(Vec::new(), level))
    }
}

impl GzipSource {
    pub fn new(input: Bytes, level: Compression) -> Self {
        Self::with_encoder(input, GzEncoder::new(Vec::new(), level))
    }
}

impl<E: StreamEncoder> EncoderSource<E> {
    pub fn with_encoder(input: Bytes, encoder: E) -> Self {
        Self {
            input,
            consumed: 0,
            encoder,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: State::Streaming,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(std::mem::take(self.encoder.buffer()))
    }
}

#[async_trait]
impl<E: StreamEncoder> ChunkSource for EncoderSource<E> {
    async fn pull(&mut self) -> Result<Pull> {
        match self.state {
            State::Done => return Err(SourceViolation::PulledAfterDone.into()),
            State::Finished => {
                self.state = State::Done;
                return Ok(Pull::Done);
            }
            State::Streaming => {}
        }

        while self.consumed < self.input.len() {
            let end = (self.consumed + self.chunk_size).min(self.input.len());
            self.encoder.write_all(&self.input[self.consumed..end])?;
            self.consumed = end;

            if self.encoder.buffer().len() >= self.chunk_size {
                return Ok(Pull::Data(self.take_output()));
            }
        }

        self.encoder.finish_stream()?;
        self.state = State::Finished;
        Ok(Pull::Data(self.take_output()))
    }
}
