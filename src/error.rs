//! Error types for archive assembly.

use std::fmt;

use thiserror::Error;

/// The point in an entry's lifecycle at which a build failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Validating the entry and writing its local file header.
    Header,
    /// Pulling chunks from the entry's source.
    Streaming,
    /// Writing the trailing data descriptor.
    Descriptor,
    /// Writing the central directory and end-of-archive records.
    Directory,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Header => "header",
            Stage::Streaming => "streaming",
            Stage::Descriptor => "descriptor",
            Stage::Directory => "directory",
        };
        f.write_str(name)
    }
}

/// Why an entry path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path starts with '/'")]
    LeadingSlash,
    #[error("path is {0} bytes long, the format allows at most 65535")]
    TooLong(usize),
}

/// Contract breaches a chunk source reports about itself.
///
/// Sources return these inside their `anyhow::Error`; the assembler turns
/// them into [`ZipError::ProtocolViolation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceViolation {
    #[error("source pulled again after reporting done")]
    PulledAfterDone,
    #[error("{0}")]
    Inconsistent(String),
}

/// Errors that abort an archive build.
///
/// Entry-scoped variants carry the zero-based entry index and its path so a
/// caller can tell which entry failed and where.
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("entry {index} ({path:?}): invalid path: {reason}")]
    InvalidPath {
        index: usize,
        path: String,
        reason: PathError,
    },

    #[error("entry {index} ({path:?}): chunk source failed during {stage}")]
    ChunkSource {
        index: usize,
        path: String,
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("entry {index} ({path:?}): protocol violation during {stage}: {detail}")]
    ProtocolViolation {
        index: usize,
        path: String,
        stage: Stage,
        detail: String,
    },

    /// Only produced when ZIP64 output is disabled in the options.
    #[error("{}: {what} exceeds the 32-bit ZIP limit during {stage}", scope(.index, .path))]
    SizeLimitExceeded {
        index: Option<usize>,
        path: Option<String>,
        stage: Stage,
        what: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn scope(index: &Option<usize>, path: &Option<String>) -> String {
    match (index, path) {
        (Some(index), Some(path)) => format!("entry {index} ({path:?})"),
        _ => "archive".to_string(),
    }
}

impl ZipError {
    /// The stage that failed, if the error is tied to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ZipError::InvalidPath { .. } => Some(Stage::Header),
            ZipError::ChunkSource { stage, .. }
            | ZipError::ProtocolViolation { stage, .. }
            | ZipError::SizeLimitExceeded { stage, .. } => Some(*stage),
            ZipError::Io(_) => None,
        }
    }

    /// Index of the entry that failed, if the error is tied to one.
    pub fn entry_index(&self) -> Option<usize> {
        match self {
            ZipError::InvalidPath { index, .. }
            | ZipError::ChunkSource { index, .. }
            | ZipError::ProtocolViolation { index, .. } => Some(*index),
            ZipError::SizeLimitExceeded { index, .. } => *index,
            ZipError::Io(_) => None,
        }
    }
}

/// Result type for archive assembly.
pub type Result<T> = std::result::Result<T, ZipError>;
