//! Central directory and end-of-archive records.
//!
//! Records are collected as entries finalize and written in one pass after
//! the last entry. ZIP64 end records are added when the entry count, the
//! directory size or offset, or any single entry overflows the classic
//! 16/32-bit fields.

use std::io::{self, Write};

use tracing::debug;

use super::accumulator::EntryTotals;
use super::structures::*;
use crate::error::{Result, Stage, ZipError};

/// Snapshot of one finalized entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    pub name: String,
    pub flags: u16,
    pub method: CompressionMethod,
    pub version_needed: u16,
    pub modified: DosDateTime,
    pub totals: EntryTotals,
    pub local_header_offset: u64,
}

impl CentralDirectoryRecord {
    pub fn needs_zip64(&self) -> bool {
        self.totals.uncompressed_size >= ZIP64_THRESHOLD
            || self.totals.compressed_size >= ZIP64_THRESHOLD
            || self.local_header_offset >= ZIP64_THRESHOLD
    }

    fn zip64_extra(&self) -> Zip64ExtraField {
        let values = [
            self.totals.uncompressed_size,
            self.totals.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .filter(|v| *v >= ZIP64_THRESHOLD)
        .collect();
        Zip64ExtraField { values }
    }

    /// Write the central directory file header and return its length.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let zip64 = self.needs_zip64();
        let extra = if zip64 {
            self.zip64_extra().encode()
        } else {
            Vec::new()
        };

        let header = CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: if zip64 {
                VERSION_ZIP64
            } else {
                self.version_needed
            },
            flags: self.flags,
            method: self.method,
            modified: self.modified,
            crc32: self.totals.crc32,
            compressed_size: self.totals.compressed_size.min(ZIP64_THRESHOLD) as u32,
            uncompressed_size: self.totals.uncompressed_size.min(ZIP64_THRESHOLD) as u32,
            local_header_offset: self.local_header_offset.min(ZIP64_THRESHOLD) as u32,
            file_name: self.name.as_bytes(),
            extra_field: &extra,
        };
        header.write_to(w)?;
        Ok(header.encoded_len() as u64)
    }
}

/// Totals that locate the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfArchiveRecord {
    pub entry_count: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    /// Emit the ZIP64 end record and locator before the classic record.
    pub zip64: bool,
}

impl EndOfArchiveRecord {
    /// Write the end records, given the archive position they start at, and
    /// return their length.
    pub fn write_to<W: Write>(&self, w: &mut W, position: u64) -> io::Result<u64> {
        let mut written = 0;
        if self.zip64 {
            Zip64EOCD::new(self.entry_count, self.cd_size, self.cd_offset).write_to(w)?;
            Zip64EOCDLocator::new(position).write_to(w)?;
            written += (Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE) as u64;
        }
        EndOfCentralDirectory::saturating(self.entry_count, self.cd_size, self.cd_offset)
            .write_to(w)?;
        Ok(written + EndOfCentralDirectory::SIZE as u64)
    }
}

/// Accumulates directory records and writes the archive trailer.
#[derive(Debug, Clone)]
pub struct CentralDirectoryBuilder {
    records: Vec<CentralDirectoryRecord>,
    allow_zip64: bool,
}

impl CentralDirectoryBuilder {
    pub fn new(allow_zip64: bool) -> Self {
        Self {
            records: Vec::new(),
            allow_zip64,
        }
    }

    pub fn push(&mut self, record: CentralDirectoryRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CentralDirectoryRecord] {
        &self.records
    }

    fn limit(what: &'static str) -> ZipError {
        ZipError::SizeLimitExceeded {
            index: None,
            path: None,
            stage: Stage::Directory,
            what,
        }
    }

    /// Write every record followed by the end-of-archive records.
    ///
    /// `cd_offset` is the archive position at which the directory starts.
    pub fn finish<W: Write>(self, w: &mut W, cd_offset: u64) -> Result<EndOfArchiveRecord> {
        let entry_count = self.records.len() as u64;
        if !self.allow_zip64 {
            if entry_count >= ZIP64_ENTRY_THRESHOLD {
                return Err(Self::limit("entry count"));
            }
            if cd_offset >= ZIP64_THRESHOLD {
                return Err(Self::limit("central directory offset"));
            }
        }

        let mut cd_size = 0u64;
        for record in &self.records {
            cd_size += record.write_to(w)?;
        }

        let zip64 = entry_count >= ZIP64_ENTRY_THRESHOLD
            || cd_size >= ZIP64_THRESHOLD
            || cd_offset >= ZIP64_THRESHOLD
            || self.records.iter().any(CentralDirectoryRecord::needs_zip64);
        if zip64 && !self.allow_zip64 {
            return Err(Self::limit("central directory size"));
        }

        let end = EndOfArchiveRecord {
            entry_count,
            cd_size,
            cd_offset,
            zip64,
        };
        debug!(
            entries = entry_count,
            cd_offset, cd_size, zip64, "writing end of archive"
        );
        end.write_to(w, cd_offset + cd_size)?;
        Ok(end)
    }
}
