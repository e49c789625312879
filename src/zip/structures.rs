use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::io::{self, Cursor, Write};

use anyhow::{Result, bail};

/// General purpose flag bit 3: CRC and sizes follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag bit 11: file name is UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

pub const VERSION_STORED: u16 = 10;
pub const VERSION_DEFLATE: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
/// Version made by: MS-DOS host, APPNOTE 4.5.
pub const VERSION_MADE_BY: u16 = VERSION_ZIP64;

/// A 32-bit size or offset at or above this value needs ZIP64 fields.
pub const ZIP64_THRESHOLD: u64 = u32::MAX as u64;
/// An entry count at or above this value needs the ZIP64 end records.
pub const ZIP64_ENTRY_THRESHOLD: u64 = u16::MAX as u64;
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// MS-DOS packed modification time and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const MIN: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };
    /// 2107-12-31 23:59:58, the latest representable instant.
    pub const MAX: DosDateTime = DosDateTime {
        time: (23 << 11) | (59 << 5) | 29,
        date: (127 << 9) | (12 << 5) | 31,
    };

    /// Pack a calendar time, clamping to the 1980..=2107 range.
    ///
    /// Seconds are stored with two-second resolution.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }
        let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        Self { time, date }
    }

    /// Current local wall-clock time.
    pub fn now() -> Self {
        Self::from_naive(&chrono::Local::now().naive_local())
    }

    /// Modification date as (year, month, day)
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Modification time as (hour, minute, second)
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/*
Local file header
      local file header signature     4 bytes  (0x04034b50)
      version needed to extract       2 bytes
      general purpose bit flag        2 bytes
      compression method              2 bytes
      last mod file time              2 bytes
      last mod file date              2 bytes
      crc-32                          4 bytes
      compressed size                 4 bytes
      uncompressed size               4 bytes
      file name length                2 bytes
      extra field length              2 bytes
      file name (variable size)
      extra field (variable size)
*/
#[derive(Debug, Clone)]
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: &'a [u8],
    pub extra_field: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub fn encoded_len(&self) -> usize {
        LFH_SIZE + self.file_name.len() + self.extra_field.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method.as_u16())?;
        w.write_u16::<LittleEndian>(self.modified.time)?;
        w.write_u16::<LittleEndian>(self.modified.date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        w.write_u16::<LittleEndian>(self.extra_field.len() as u16)?;
        w.write_all(self.file_name)?;
        w.write_all(self.extra_field)
    }
}

/// Data descriptor - 16 bytes, or 24 bytes with ZIP64 sizes
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";
pub const DATA_DESCRIPTOR_SIZE: usize = 16;
pub const DATA_DESCRIPTOR_ZIP64_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Write the sizes as 8-byte fields.
    pub zip64: bool,
}

impl DataDescriptor {
    pub fn encoded_len(&self) -> usize {
        if self.zip64 {
            DATA_DESCRIPTOR_ZIP64_SIZE
        } else {
            DATA_DESCRIPTOR_SIZE
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        if self.zip64 {
            w.write_u64::<LittleEndian>(self.compressed_size)?;
            w.write_u64::<LittleEndian>(self.uncompressed_size)
        } else {
            w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            w.write_u32::<LittleEndian>(self.uncompressed_size as u32)
        }
    }

    /// Parse a descriptor, with or without its optional signature.
    pub fn from_bytes(data: &[u8], zip64: bool) -> Result<Self> {
        let body = if data.len() >= 4 && &data[0..4] == DATA_DESCRIPTOR_SIGNATURE {
            &data[4..]
        } else {
            data
        };
        let needed = if zip64 { 20 } else { 12 };
        if body.len() < needed {
            bail!("Truncated data descriptor");
        }

        let mut cursor = Cursor::new(body);
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                cursor.read_u64::<LittleEndian>()?,
                cursor.read_u64::<LittleEndian>()?,
            )
        } else {
            (
                cursor.read_u32::<LittleEndian>()? as u64,
                cursor.read_u32::<LittleEndian>()? as u64,
            )
        };

        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
            zip64,
        })
    }
}

/// ZIP64 extended information extra field (header ID 0x0001).
///
/// Holds only the values whose 32-bit header fields were saturated, in the
/// fixed order: uncompressed size, compressed size, local header offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    pub values: Vec<u64>,
}

impl Zip64ExtraField {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.values.len() * 8);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        w.write_u16::<LittleEndian>((self.values.len() * 8) as u16)?;
        for value in &self.values {
            w.write_u64::<LittleEndian>(*value)?;
        }
        Ok(())
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader<'a> {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub local_header_offset: u32,
    pub file_name: &'a [u8],
    pub extra_field: &'a [u8],
}

impl CentralDirectoryHeader<'_> {
    pub fn encoded_len(&self) -> usize {
        CDFH_MIN_SIZE + self.file_name.len() + self.extra_field.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method.as_u16())?;
        w.write_u16::<LittleEndian>(self.modified.time)?;
        w.write_u16::<LittleEndian>(self.modified.date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        w.write_u16::<LittleEndian>(self.extra_field.len() as u16)?;
        w.write_u16::<LittleEndian>(0)?; // comment length
        w.write_u16::<LittleEndian>(0)?; // disk number start
        w.write_u16::<LittleEndian>(0)?; // internal attributes
        w.write_u32::<LittleEndian>(0)?; // external attributes
        w.write_u32::<LittleEndian>(self.local_header_offset)?;
        w.write_all(self.file_name)?;
        w.write_all(self.extra_field)
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Build the classic record, saturating any field that does not fit.
    pub fn saturating(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        let entries = total_entries.min(ZIP64_ENTRY_THRESHOLD) as u16;
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: cd_size.min(ZIP64_THRESHOLD) as u32,
            cd_offset: cd_offset.min(ZIP64_THRESHOLD) as u32,
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid End of Central Directory");
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn new(eocd64_offset: u64) -> Self {
        Self {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            // Size of the remaining record, excluding the leading 12 bytes.
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.eocd64_size)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub modified: DosDateTime,
}

impl ZipFileEntry {
    /// Whether sizes and CRC were deferred to a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn dos_time_packs_fields() {
        let dos = DosDateTime::from_naive(&at(2024, 3, 15, 13, 45, 31));
        assert_eq!(dos.date_parts(), (2024, 3, 15));
        // Two-second resolution rounds down.
        assert_eq!(dos.time_parts(), (13, 45, 30));
    }

    #[test]
    fn dos_time_clamps_out_of_range_years() {
        assert_eq!(DosDateTime::from_naive(&at(1970, 1, 1, 0, 0, 0)), DosDateTime::MIN);
        assert_eq!(DosDateTime::from_naive(&at(2200, 6, 1, 0, 0, 0)), DosDateTime::MAX);
        assert_eq!(DosDateTime::MAX.date_parts(), (2107, 12, 31));
        assert_eq!(DosDateTime::MAX.time_parts(), (23, 59, 58));
    }

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader {
            version_needed: VERSION_DEFLATE,
            flags: FLAG_DATA_DESCRIPTOR,
            method: CompressionMethod::Deflate,
            modified: DosDateTime::MIN,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: b"a.txt",
            extra_field: &[],
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), header.encoded_len());
        assert_eq!(&buf[0..4], LFH_SIGNATURE);
        assert_eq!(u16::from_le_bytes([buf[6], buf[7]]), FLAG_DATA_DESCRIPTOR);
        assert_eq!(u16::from_le_bytes([buf[8], buf[9]]), 8);
        assert_eq!(u16::from_le_bytes([buf[26], buf[27]]), 5);
        assert_eq!(&buf[30..], b"a.txt");
    }

    #[test]
    fn descriptor_widths() {
        let mut small = Vec::new();
        DataDescriptor {
            crc32: 0xDEADBEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            zip64: false,
        }
        .write_to(&mut small)
        .unwrap();
        assert_eq!(small.len(), DATA_DESCRIPTOR_SIZE);

        let big = DataDescriptor {
            crc32: 1,
            compressed_size: 5 << 32,
            uncompressed_size: 6 << 32,
            zip64: true,
        };
        let mut buf = Vec::new();
        big.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), DATA_DESCRIPTOR_ZIP64_SIZE);
        assert_eq!(DataDescriptor::from_bytes(&buf, true).unwrap(), big);
    }

    #[test]
    fn end_records_round_trip() {
        let eocd = EndOfCentralDirectory::saturating(70_000, 100, 5 << 32);
        assert_eq!(eocd.total_entries, 0xFFFF);
        assert_eq!(eocd.cd_size, 100);
        assert_eq!(eocd.cd_offset, 0xFFFFFFFF);
        assert!(eocd.is_zip64());

        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(EndOfCentralDirectory::from_bytes(&buf).unwrap(), eocd);

        let eocd64 = Zip64EOCD::new(70_000, 100, 5 << 32);
        let mut buf = Vec::new();
        eocd64.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCD::MIN_SIZE);
        assert_eq!(Zip64EOCD::from_bytes(&buf).unwrap(), eocd64);

        let locator = Zip64EOCDLocator::new(1234);
        let mut buf = Vec::new();
        locator.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCDLocator::SIZE);
        assert_eq!(Zip64EOCDLocator::from_bytes(&buf).unwrap(), locator);
    }

    #[test]
    fn zip64_extra_encoding() {
        let extra = Zip64ExtraField {
            values: vec![1, 2],
        };
        let bytes = extra.encode();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..4], &[0x01, 0x00, 16, 0]);
    }
}
