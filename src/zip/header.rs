//! Local file header and data descriptor writers.
//!
//! A [`HeaderPlan`] decides, before any entry data exists in the output,
//! what the local header will claim: real CRC and sizes when they are known
//! up front, or zero placeholders plus the data-descriptor flag when the
//! compressed size only becomes known after streaming.

use std::io::{self, Write};

use super::accumulator::EntryTotals;
use super::structures::*;

/// Worst-case raw DEFLATE size for `len` input bytes (zlib's `compressBound`).
pub fn deflate_bound(len: u64) -> u64 {
    len.saturating_add(len >> 12)
        .saturating_add(len >> 14)
        .saturating_add(len >> 25)
        .saturating_add(13)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizes {
    /// CRC and sizes are written into the local header.
    Known(EntryTotals),
    /// Placeholders in the header, real values in a trailing descriptor.
    /// `zip64` marks a header that announces 64-bit sizes.
    Deferred { zip64: bool },
}

/// Everything the local header of one entry needs besides its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPlan {
    pub method: CompressionMethod,
    pub flags: u16,
    pub version_needed: u16,
    pub modified: DosDateTime,
    pub sizes: Sizes,
}

fn name_flags(name: &[u8]) -> u16 {
    if name.is_ascii() { 0 } else { FLAG_UTF8 }
}

impl HeaderPlan {
    /// Header for an entry whose totals are known before writing.
    pub fn known(
        name: &[u8],
        method: CompressionMethod,
        totals: EntryTotals,
        modified: DosDateTime,
    ) -> Self {
        let zip64 = totals.compressed_size >= ZIP64_THRESHOLD
            || totals.uncompressed_size >= ZIP64_THRESHOLD;
        let version_needed = match (zip64, method) {
            (true, _) => VERSION_ZIP64,
            (false, CompressionMethod::Stored) => VERSION_STORED,
            (false, _) => VERSION_DEFLATE,
        };
        Self {
            method,
            flags: name_flags(name),
            version_needed,
            modified,
            sizes: Sizes::Known(totals),
        }
    }

    /// Header for an entry whose compressed size is only known after
    /// streaming. ZIP64 is announced when the input, or its worst-case
    /// DEFLATE expansion, cannot fit 32 bits.
    pub fn deferred(
        name: &[u8],
        method: CompressionMethod,
        uncompressed_len: u64,
        modified: DosDateTime,
    ) -> Self {
        let zip64 = deflate_bound(uncompressed_len) >= ZIP64_THRESHOLD;
        Self {
            method,
            flags: name_flags(name) | FLAG_DATA_DESCRIPTOR,
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE },
            modified,
            sizes: Sizes::Deferred { zip64 },
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.sizes, Sizes::Deferred { .. })
    }

    pub fn is_zip64(&self) -> bool {
        self.version_needed == VERSION_ZIP64
    }
}

/// Write the local file header and return the number of bytes written.
pub fn write_local_header<W: Write>(w: &mut W, name: &[u8], plan: &HeaderPlan) -> io::Result<u64> {
    let (crc32, compressed, uncompressed, extra) = match plan.sizes {
        Sizes::Known(totals) if plan.is_zip64() => (
            totals.crc32,
            u32::MAX,
            u32::MAX,
            Zip64ExtraField {
                values: vec![totals.uncompressed_size, totals.compressed_size],
            }
            .encode(),
        ),
        Sizes::Known(totals) => (
            totals.crc32,
            totals.compressed_size as u32,
            totals.uncompressed_size as u32,
            Vec::new(),
        ),
        Sizes::Deferred { zip64: true } => (
            0,
            u32::MAX,
            u32::MAX,
            Zip64ExtraField { values: vec![0, 0] }.encode(),
        ),
        Sizes::Deferred { zip64: false } => (0, 0, 0, Vec::new()),
    };

    let header = LocalFileHeader {
        version_needed: plan.version_needed,
        flags: plan.flags,
        method: plan.method,
        modified: plan.modified,
        crc32,
        compressed_size: compressed,
        uncompressed_size: uncompressed,
        file_name: name,
        extra_field: &extra,
    };
    header.write_to(w)?;
    Ok(header.encoded_len() as u64)
}

/// Write the data descriptor that follows a deferred entry's data and
/// return the number of bytes written.
///
/// Sizes are 64-bit when the header announced ZIP64 or when either size
/// does not fit 32 bits.
pub fn write_data_descriptor<W: Write>(
    w: &mut W,
    totals: &EntryTotals,
    header_zip64: bool,
) -> io::Result<u64> {
    let descriptor = DataDescriptor {
        crc32: totals.crc32,
        compressed_size: totals.compressed_size,
        uncompressed_size: totals.uncompressed_size,
        zip64: header_zip64
            || totals.compressed_size >= ZIP64_THRESHOLD
            || totals.uncompressed_size >= ZIP64_THRESHOLD,
    };
    descriptor.write_to(w)?;
    Ok(descriptor.encoded_len() as u64)
}
