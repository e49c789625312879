//! Unwraps a gzip-producing backend into a raw DEFLATE chunk source.
//!
//! Many compression backends only speak gzip. A gzip member is a header,
//! a DEFLATE body and an 8-byte trailer (CRC-32 and input size modulo
//! 2^32), so the body is exactly what a ZIP entry stores. [`GzipMember`]
//! parses the header, forwards the body as it arrives and holds back the
//! last eight bytes until the inner source reports done.

use anyhow::Result;
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};

use super::{ChunkSource, Pull};
use crate::error::SourceViolation;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 8;
const GZIP_FIXED_HEADER: usize = 10;
const GZIP_TRAILER: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xE0;

fn inconsistent(detail: impl Into<String>) -> anyhow::Error {
    SourceViolation::Inconsistent(detail.into()).into()
}

/// Length of a complete gzip header at the start of `buf`, or `None` if more
/// bytes are needed.
fn header_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < GZIP_FIXED_HEADER {
        return Ok(None);
    }
    if buf[0..2] != GZIP_MAGIC {
        return Err(inconsistent("gzip source did not start with a gzip header"));
    }
    if buf[2] != GZIP_METHOD_DEFLATE {
        return Err(inconsistent(format!("gzip method {} is not deflate", buf[2])));
    }
    let flags = buf[3];
    if flags & FRESERVED != 0 {
        return Err(inconsistent("gzip header has reserved flags set"));
    }

    let mut pos = GZIP_FIXED_HEADER;
    if flags & FEXTRA != 0 {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        pos += 2 + LittleEndian::read_u16(&buf[pos..pos + 2]) as usize;
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            match buf.get(pos..).and_then(|rest| rest.iter().position(|b| *b == 0)) {
                Some(nul) => pos += nul + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }

    Ok((buf.len() >= pos).then_some(pos))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Done,
}

/// Strips gzip framing from an inner source.
///
/// When built with [`expect_trailer`](Self::expect_trailer), the trailer is checked
/// against the CRC-32 and length of the original input; a mismatch is
/// reported as inconsistent source data.
pub struct GzipMember<S> {
    inner: S,
    held: BytesMut,
    phase: Phase,
    expected: Option<(u32, u64)>,
}

impl<S: ChunkSource> GzipMember<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            held: BytesMut::new(),
            phase: Phase::Header,
            expected: None,
        }
    }

    pub fn expect_trailer(mut self, crc32: u32, size: u64) -> Self {
        self.expected = Some((crc32, size));
        self
    }

    fn check_trailer(&self) -> Result<()> {
        if self.held.len() != GZIP_TRAILER {
            return Err(inconsistent(format!(
                "gzip stream ended with {} trailer bytes, expected {}",
                self.held.len(),
                GZIP_TRAILER
            )));
        }
        let crc = LittleEndian::read_u32(&self.held[0..4]);
        let input_size = LittleEndian::read_u32(&self.held[4..8]);

        if let Some((expected_crc, expected_size)) = self.expected {
            if crc != expected_crc || input_size != expected_size as u32 {
                return Err(inconsistent(format!(
                    "gzip trailer (crc {crc:#010x}, size {input_size}) does not match input \
                     (crc {expected_crc:#010x}, size {})",
                    expected_size as u32
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for GzipMember<S> {
    async fn pull(&mut self) -> Result<Pull> {
        loop {
            match self.phase {
                Phase::Done => return Err(SourceViolation::PulledAfterDone.into()),
                Phase::Header => {
                    if let Some(len) = header_len(&self.held)? {
                        self.held.advance(len);
                        self.phase = Phase::Body;
                        continue;
                    }
                }
                Phase::Body => {
                    if self.held.len() > GZIP_TRAILER {
                        let body = self.held.split_to(self.held.len() - GZIP_TRAILER);
                        return Ok(Pull::Data(body.freeze()));
                    }
                }
            }

            match self.inner.pull().await? {
                Pull::Data(chunk) => self.held.extend_from_slice(&chunk),
                Pull::Done => {
                    if self.phase == Phase::Header {
                        return Err(inconsistent("gzip stream ended inside its header"));
                    }
                    self.check_trailer()?;
                    self.phase = Phase::Done;
                    return Ok(Pull::Done);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteByByte, DeflateSource, GzipSource, collect};
    use bytes::Bytes;
    use flate2::Compression;
    use flate2::GzBuilder;
    use std::io::Write;

    struct Fixed(Option<Bytes>);

    #[async_trait]
    impl ChunkSource for Fixed {
        async fn pull(&mut self) -> Result<Pull> {
            Ok(self.0.take().map_or(Pull::Done, Pull::Data))
        }
    }

    fn input() -> Bytes {
        Bytes::from("gzip framing gzip framing gzip framing\n".repeat(40))
    }

    #[tokio::test]
    async fn body_matches_raw_deflate() {
        let mut raw = DeflateSource::new(input(), Compression::default());
        let mut framed = GzipMember::new(GzipSource::new(input(), Compression::default()));
        assert_eq!(
            collect(&mut framed).await.unwrap(),
            collect(&mut raw).await.unwrap()
        );
    }

    #[tokio::test]
    async fn byte_granular_inner_source() {
        let mut raw = DeflateSource::new(input(), Compression::default());
        let mut framed = GzipMember::new(ByteByByte::new(GzipSource::new(
            input(),
            Compression::default(),
        )))
        .expect_trailer(crc32fast::hash(&input()), input().len() as u64);
        assert_eq!(
            collect(&mut framed).await.unwrap(),
            collect(&mut raw).await.unwrap()
        );
    }

    #[tokio::test]
    async fn optional_header_fields_are_skipped() {
        let mut encoder = GzBuilder::new()
            .filename("data.txt")
            .comment("note")
            .extra(vec![1, 2, 3])
            .write(Vec::new(), Compression::default());
        encoder.write_all(&input()).unwrap();
        let member = encoder.finish().unwrap();

        let mut raw = DeflateSource::new(input(), Compression::default());
        let mut framed = GzipMember::new(Fixed(Some(member.into())));
        assert_eq!(
            collect(&mut framed).await.unwrap(),
            collect(&mut raw).await.unwrap()
        );
    }

    #[tokio::test]
    async fn trailer_mismatch_is_inconsistent() {
        let mut framed = GzipMember::new(GzipSource::new(input(), Compression::default()))
            .expect_trailer(0x12345678, input().len() as u64);
        let err = collect(&mut framed).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceViolation>(),
            Some(SourceViolation::Inconsistent(_))
        ));
    }

    #[tokio::test]
    async fn non_gzip_input_is_rejected() {
        let mut framed = GzipMember::new(Fixed(Some(Bytes::from_static(b"PK\x03\x04 not gzip"))));
        assert!(collect(&mut framed).await.is_err());
    }

    #[tokio::test]
    async fn truncated_trailer_is_rejected() {
        let mut gz = GzipSource::new(input(), Compression::default());
        let mut member = collect(&mut gz).await.unwrap();
        member.truncate(GZIP_FIXED_HEADER + 4);

        let mut framed = GzipMember::new(Fixed(Some(member.into())));
        let err = collect(&mut framed).await.unwrap_err();
        assert!(err.to_string().contains("trailer bytes"));
    }
}
