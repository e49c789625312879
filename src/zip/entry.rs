use bytes::Bytes;

use crate::error::PathError;

/// One named payload to place in an archive.
///
/// `data` accepts anything convertible into [`Bytes`]: `Vec<u8>`,
/// `String`, static strings and byte slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub path: String,
    pub data: Bytes,
}

impl ZipEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Check that `path` can be stored as an archive file name and return its
/// encoded bytes.
///
/// Names are stored as UTF-8, so any Rust string is representable as long
/// as it fits the 16-bit length field.
pub fn validate_path(path: &str) -> Result<&[u8], PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.starts_with('/') {
        return Err(PathError::LeadingSlash);
    }
    if path.len() > u16::MAX as usize {
        return Err(PathError::TooLong(path.len()));
    }
    Ok(path.as_bytes())
}
