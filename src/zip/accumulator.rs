//! Running CRC-32 and byte counts for one entry's data stream.

use crc32fast::Hasher;

/// Final CRC and sizes of a fully drained entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryTotals {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Tracks CRC-32 over the uncompressed bytes plus both byte counts.
///
/// One accumulator serves exactly one entry: [`finalize`](Self::finalize)
/// consumes it.
#[derive(Debug, Default)]
pub struct EntryAccumulator {
    hasher: Hasher,
    uncompressed: u64,
    compressed: u64,
}

impl EntryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes as they appear before compression.
    pub fn update_uncompressed(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.uncompressed += data.len() as u64;
    }

    /// Count bytes as they are written to the archive.
    pub fn update_compressed(&mut self, data: &[u8]) {
        self.compressed += data.len() as u64;
    }

    /// Feed bytes that are written verbatim (stored entries).
    pub fn update_stored(&mut self, data: &[u8]) {
        self.update_uncompressed(data);
        self.update_compressed(data);
    }

    pub fn compressed_so_far(&self) -> u64 {
        self.compressed
    }

    pub fn finalize(self) -> EntryTotals {
        EntryTotals {
            crc32: self.hasher.finalize(),
            compressed_size: self.compressed,
            uncompressed_size: self.uncompressed,
        }
    }
}
