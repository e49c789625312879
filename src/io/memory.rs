use super::ReadAt;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// An archive held in memory, usually straight out of the assembler.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

#[async_trait]
impl ReadAt for MemoryReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
