//! Integrity checking for finished archives.
//!
//! [`ZipVerifier`] reads an archive the way an unzip tool would and checks
//! every structural promise the writer makes: the end records locate the
//! directory, every directory record points at a matching local header,
//! entries are laid out back to back, and each entry inflates to data whose
//! CRC-32 and size agree with the directory and the data descriptor.

use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail, ensure};
use tracing::debug;

use super::parser::{DirectoryLocation, LocalHeader, ZipParser};
use super::structures::*;

/// Upper bound on buffer space reserved up front for an inflated entry.
const MAX_PREALLOC: u64 = 1 << 20;

/// Summary of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: usize,
    pub zip64: bool,
    pub data_descriptors: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

pub struct ZipVerifier<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipVerifier<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Decompress one entry and check its CRC-32 and size against the
    /// directory.
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let header = self.parser.read_local_header(entry).await?;
        self.read_entry_data(entry, &header).await
    }

    async fn read_entry_data(&self, entry: &ZipFileEntry, header: &LocalHeader) -> Result<Vec<u8>> {
        // Sizes come from the archive itself; check them against the file
        // before trusting them with an allocation.
        ensure!(
            header
                .data_offset
                .checked_add(entry.compressed_size)
                .is_some_and(|end| end <= self.parser.size()),
            "{}: entry data extends past the end of the archive",
            entry.file_name
        );
        let mut raw = vec![0u8; entry.compressed_size as usize];
        let n = self
            .parser
            .reader()
            .read_at(header.data_offset, &mut raw)
            .await?;
        ensure!(n == raw.len(), "{}: entry data is truncated", entry.file_name);

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
                // One byte past the declared size is enough to report a mismatch.
                DeflateDecoder::new(raw.as_slice())
                    .take(entry.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut out)
                    .with_context(|| format!("{}: invalid deflate stream", entry.file_name))?;
                out
            }
            CompressionMethod::Unknown(m) => {
                bail!("{}: unsupported compression method {m}", entry.file_name)
            }
        };

        ensure!(
            data.len() as u64 == entry.uncompressed_size,
            "{}: size mismatch: directory says {}, data has {}",
            entry.file_name,
            entry.uncompressed_size,
            data.len()
        );
        let crc = crc32fast::hash(&data);
        ensure!(
            crc == entry.crc32,
            "{}: CRC mismatch: directory says {:08x}, data has {crc:08x}",
            entry.file_name,
            entry.crc32
        );
        Ok(data)
    }

    /// Check the whole archive, in the manner of `unzip -t`.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let location = self.parser.locate_directory().await?;
        let entries = self.parser.read_directory(&location).await?;
        self.check_trailer(&location)?;

        let mut report = VerifyReport {
            entries: entries.len(),
            zip64: location.zip64,
            ..VerifyReport::default()
        };

        let mut expected_offset = 0u64;
        for entry in &entries {
            ensure!(
                entry.lfh_offset == expected_offset,
                "{}: local header at {} but previous entry ended at {expected_offset}",
                entry.file_name,
                entry.lfh_offset
            );
            let header = self.parser.read_local_header(entry).await?;
            self.check_local_header(entry, &header)?;
            self.read_entry_data(entry, &header).await?;

            let mut end = header.data_offset + entry.compressed_size;
            if entry.has_data_descriptor() {
                end += self.check_descriptor(entry, &header, end).await?;
                report.data_descriptors += 1;
            }
            expected_offset = end;

            report.uncompressed_bytes += entry.uncompressed_size;
            report.compressed_bytes += entry.compressed_size;
            debug!(name = %entry.file_name, size = entry.uncompressed_size, "entry ok");
        }

        ensure!(
            expected_offset == location.cd_offset,
            "Central directory starts at {} but entries end at {expected_offset}",
            location.cd_offset
        );

        Ok(report)
    }

    fn check_trailer(&self, location: &DirectoryLocation) -> Result<()> {
        let trailer = if location.zip64 {
            (Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE) as u64
        } else {
            0
        };
        ensure!(
            location.cd_offset + location.cd_size + trailer == location.eocd_offset,
            "End records do not follow the central directory"
        );
        ensure!(
            location.eocd_offset + EndOfCentralDirectory::SIZE as u64 == self.parser.size(),
            "Trailing bytes after the end record"
        );
        Ok(())
    }

    fn check_local_header(&self, entry: &ZipFileEntry, header: &LocalHeader) -> Result<()> {
        let name = &entry.file_name;
        ensure!(
            header.file_name == entry.file_name.as_bytes(),
            "{name}: local header names {:?}",
            String::from_utf8_lossy(&header.file_name)
        );
        ensure!(header.flags == entry.flags, "{name}: flags differ from directory");
        ensure!(header.method == entry.compression_method, "{name}: method differs");

        if entry.has_data_descriptor() {
            ensure!(header.crc32 == 0, "{name}: deferred entry has a CRC in its header");
            let placeholder = if header.zip64_extra { u32::MAX } else { 0 };
            ensure!(
                header.compressed_size == placeholder && header.uncompressed_size == placeholder,
                "{name}: deferred entry has sizes in its header"
            );
        } else {
            ensure!(header.crc32 == entry.crc32, "{name}: header CRC differs");
            if !header.zip64_extra {
                ensure!(
                    header.compressed_size as u64 == entry.compressed_size
                        && header.uncompressed_size as u64 == entry.uncompressed_size,
                    "{name}: header sizes differ from directory"
                );
            }
        }
        Ok(())
    }

    /// Check the descriptor at `offset` and return its length.
    async fn check_descriptor(
        &self,
        entry: &ZipFileEntry,
        header: &LocalHeader,
        offset: u64,
    ) -> Result<u64> {
        let zip64 = header.descriptor_is_zip64(entry);
        let mut buf = vec![0u8; DATA_DESCRIPTOR_ZIP64_SIZE];
        let len = if zip64 {
            DATA_DESCRIPTOR_ZIP64_SIZE
        } else {
            DATA_DESCRIPTOR_SIZE
        };
        buf.truncate(len);
        let n = self.parser.reader().read_at(offset, &mut buf).await?;
        ensure!(n == len, "{}: data descriptor is truncated", entry.file_name);
        ensure!(
            &buf[0..4] == DATA_DESCRIPTOR_SIGNATURE,
            "{}: data descriptor signature missing",
            entry.file_name
        );

        let descriptor = DataDescriptor::from_bytes(&buf, zip64)?;
        ensure!(
            descriptor.crc32 == entry.crc32
                && descriptor.compressed_size == entry.compressed_size
                && descriptor.uncompressed_size == entry.uncompressed_size,
            "{}: data descriptor disagrees with directory",
            entry.file_name
        );
        Ok(len as u64)
    }
}
