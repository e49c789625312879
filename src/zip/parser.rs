//! Reader-side parsing of finished archives.
//!
//! Archives are read from the end: the end-of-central-directory record
//! locates the directory (through the ZIP64 end record when the classic
//! fields are saturated), and each directory record points back at a
//! local file header.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail, ensure};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives, after resolving ZIP64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub eocd_offset: u64,
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    pub zip64: bool,
}

/// What the local file header of an entry declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    /// The header carries a ZIP64 extended information field.
    pub zip64_extra: bool,
    /// Offset of the first data byte.
    pub data_offset: u64,
}

impl LocalHeader {
    /// Width of the data descriptor that follows this entry's data.
    pub fn descriptor_is_zip64(&self, entry: &ZipFileEntry) -> bool {
        self.zip64_extra
            || entry.compressed_size >= ZIP64_THRESHOLD
            || entry.uncompressed_size >= ZIP64_THRESHOLD
    }
}

/// Parser over any [`ReadAt`] source.
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.reader.read_at(offset, buf).await?;
        ensure!(
            n == buf.len(),
            "Short read at offset {offset}: wanted {} bytes, got {n}",
            buf.len()
        );
        Ok(())
    }

    /// Find the End of Central Directory record, tolerating a trailing
    /// archive comment.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf).await?;

        let last = buf.len().checked_sub(EndOfCentralDirectory::SIZE);
        for i in last.into_iter().flat_map(|last| (0..=last).rev()) {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 end record through the locator that sits right
    /// before the classic end record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .context("No room for a ZIP64 locator")?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf).await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        ensure!(
            locator.eocd64_offset + Zip64EOCD::MIN_SIZE as u64 == locator_offset,
            "ZIP64 end record does not end at the locator"
        );

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Resolve the central directory location.
    pub async fn locate_directory(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        // A saturated field means the real value is in the ZIP64 record; a
        // locator may also be present when nothing saturated.
        let has_locator = eocd_offset >= (Zip64EOCDLocator::SIZE + Zip64EOCD::MIN_SIZE) as u64 && {
            let mut sig = [0u8; 4];
            self.read_exact_at(eocd_offset - Zip64EOCDLocator::SIZE as u64, &mut sig)
                .await?;
            sig == Zip64EOCDLocator::SIGNATURE
        };

        if eocd.is_zip64() || has_locator {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            return Ok(DirectoryLocation {
                eocd_offset,
                cd_offset: eocd64.cd_offset,
                cd_size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
                zip64: true,
            });
        }

        Ok(DirectoryLocation {
            eocd_offset,
            cd_offset: eocd.cd_offset as u64,
            cd_size: eocd.cd_size as u64,
            total_entries: eocd.total_entries as u64,
            zip64: false,
        })
    }

    /// List every entry in the central directory.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let location = self.locate_directory().await?;
        self.read_directory(&location).await
    }

    pub async fn read_directory(&self, location: &DirectoryLocation) -> Result<Vec<ZipFileEntry>> {
        ensure!(
            location
                .cd_offset
                .checked_add(location.cd_size)
                .is_some_and(|end| end <= self.size),
            "Central directory extends past the end of the archive"
        );
        let mut cd_data = vec![0u8; location.cd_size as usize];
        self.read_exact_at(location.cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(location.total_entries.min(1 << 20) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for i in 0..location.total_entries {
            let entry = parse_cdfh(&mut cursor)
                .with_context(|| format!("Central directory record {i}"))?;
            entries.push(entry);
        }
        ensure!(
            cursor.position() == location.cd_size,
            "Central directory size mismatch: records span {} bytes, end record says {}",
            cursor.position(),
            location.cd_size
        );

        Ok(entries)
    }

    /// Read the local file header of `entry`.
    pub async fn read_local_header(&self, entry: &ZipFileEntry) -> Result<LocalHeader> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.read_exact_at(entry.lfh_offset, &mut lfh_buf).await?;
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header at offset {}", entry.lfh_offset);
        }

        let mut cursor = Cursor::new(&lfh_buf[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let _time = cursor.read_u16::<LittleEndian>()?;
        let _date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;

        let mut variable = vec![0u8; file_name_length + extra_field_length];
        self.read_exact_at(entry.lfh_offset + LFH_SIZE as u64, &mut variable)
            .await?;
        let extra = &variable[file_name_length..];
        let zip64_extra = extra_fields(extra).any(|(id, _)| id == ZIP64_EXTRA_ID);
        variable.truncate(file_name_length);

        Ok(LocalHeader {
            version_needed,
            flags,
            method: CompressionMethod::from_u16(method),
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: variable,
            zip64_extra,
            data_offset: entry.lfh_offset + (LFH_SIZE + file_name_length + extra_field_length) as u64,
        })
    }
}

/// Iterate `(header id, body)` pairs of an extra field block.
fn extra_fields(mut data: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([data[0], data[1]]);
        let len = (u16::from_le_bytes([data[2], data[3]]) as usize).min(data.len() - 4);
        let body = &data[4..4 + len];
        data = &data[4 + len..];
        Some((id, body))
    })
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        bail!("Invalid Central Directory File Header");
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;
    for (id, body) in extra_fields(&extra) {
        if id != ZIP64_EXTRA_ID {
            continue;
        }
        // Values appear only for saturated header fields, in this order.
        let mut values = Cursor::new(body);
        if uncompressed_size == ZIP64_THRESHOLD {
            uncompressed_size = values.read_u64::<LittleEndian>()?;
        }
        if compressed_size == ZIP64_THRESHOLD {
            compressed_size = values.read_u64::<LittleEndian>()?;
        }
        if lfh_offset == ZIP64_THRESHOLD {
            lfh_offset = values.read_u64::<LittleEndian>()?;
        }
    }

    cursor.set_position(cursor.position() + file_comment_length as u64);

    Ok(ZipFileEntry {
        file_name,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        modified: DosDateTime { time, date },
    })
}
