//! Failure propagation: every error aborts the build and names the entry
//! and the stage it failed in.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use streamzip::{
    ArchiveOptions, ChunkSource, DeflateSource, MemoryReader, PathError, Pull, Stage, ZipAssembler,
    ZipEntry, ZipError, ZipVerifier, create_zip,
};

/// Yields a few chunks, then fails.
struct FlakyBackend {
    remaining: usize,
}

#[async_trait]
impl ChunkSource for FlakyBackend {
    async fn pull(&mut self) -> anyhow::Result<Pull> {
        if self.remaining == 0 {
            anyhow::bail!("compression backend went away");
        }
        self.remaining -= 1;
        Ok(Pull::Data(Bytes::from_static(b"\x03\x00")))
    }
}

/// Forwards to a deflate source but swallows its first `Done`, so the
/// inner source gets pulled after it finished.
struct ForgetfulAdapter {
    inner: DeflateSource,
    finished_once: bool,
}

#[async_trait]
impl ChunkSource for ForgetfulAdapter {
    async fn pull(&mut self) -> anyhow::Result<Pull> {
        match self.inner.pull().await? {
            Pull::Done if !self.finished_once => {
                self.finished_once = true;
                Ok(Pull::Data(Bytes::new()))
            }
            other => Ok(other),
        }
    }
}

fn entries() -> Vec<ZipEntry> {
    vec![
        ZipEntry::new("first.txt", "fine"),
        ZipEntry::new("second.txt", "breaks"),
    ]
}

#[tokio::test]
async fn source_errors_name_the_entry() {
    let options = ArchiveOptions::default().source(|_data: Bytes| FlakyBackend { remaining: 2 });
    let err = create_zip(entries(), &options).await.unwrap_err();

    match &err {
        ZipError::ChunkSource {
            index, path, stage, ..
        } => {
            assert_eq!(*index, 0);
            assert_eq!(path, "first.txt");
            assert_eq!(*stage, Stage::Streaming);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("first.txt"), "{message}");
    let source = std::error::Error::source(&err).unwrap();
    assert!(source.to_string().contains("backend went away"));
}

#[tokio::test]
async fn pulling_a_finished_source_is_a_protocol_violation() {
    let options = ArchiveOptions::default().source(|data: Bytes| ForgetfulAdapter {
        inner: DeflateSource::new(data, Compression::default()),
        finished_once: false,
    });
    let err = create_zip(entries(), &options).await.unwrap_err();

    assert!(
        matches!(
            err,
            ZipError::ProtocolViolation {
                index: 0,
                stage: Stage::Streaming,
                ..
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn store_mode_never_opens_a_source() {
    let options = ArchiveOptions::default()
        .compress(false)
        .source(|_data: Bytes| FlakyBackend { remaining: 0 });
    assert!(create_zip(entries(), &options).await.is_ok());
}

#[tokio::test]
async fn invalid_paths_are_rejected_before_writing() {
    for (path, reason) in [("", PathError::Empty), ("/root.txt", PathError::LeadingSlash)] {
        let mut zip = ZipAssembler::new(ArchiveOptions::default());
        zip.add_entry(ZipEntry::new("ok", "ok")).await.unwrap();
        let before = zip.position();

        let err = zip.add_entry(ZipEntry::new(path, "data")).await.unwrap_err();
        match err {
            ZipError::InvalidPath {
                index, reason: r, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(r, reason);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(zip.position(), before);
        assert_eq!(zip.entry_count(), 1);
    }
}

#[tokio::test]
async fn failed_entry_is_rolled_back() {
    let factory = |data: Bytes| -> Box<dyn ChunkSource> {
        if data.as_ref() == b"boom" {
            Box::new(FlakyBackend { remaining: 1 })
        } else {
            Box::new(DeflateSource::new(data, Compression::default()))
        }
    };
    let mut zip = ZipAssembler::new(ArchiveOptions::default().source(factory));
    zip.add_entry(ZipEntry::new("kept.txt", "kept")).await.unwrap();
    let position = zip.position();

    let err = zip.add_entry(ZipEntry::new("boom.txt", "boom")).await.unwrap_err();
    assert_eq!(err.entry_index(), Some(1));
    assert_eq!(zip.position(), position);

    zip.add_entry(ZipEntry::new("after.txt", "after")).await.unwrap();
    let archive = zip.finish().unwrap();

    let verifier = ZipVerifier::new(Arc::new(MemoryReader::new(archive)));
    let report = verifier.verify().await.unwrap();
    assert_eq!(report.entries, 2);
    let names: Vec<_> = verifier
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(names, ["kept.txt", "after.txt"]);
}

#[tokio::test]
async fn entry_count_limit_without_zip64() {
    let entries = (0..65_535).map(|i| ZipEntry::new(format!("{i}"), ""));
    let options = ArchiveOptions::default().compress(false).zip64(false);
    let err = create_zip(entries, &options).await.unwrap_err();

    assert!(
        matches!(
            err,
            ZipError::SizeLimitExceeded {
                index: None,
                stage: Stage::Directory,
                what: "entry count",
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(err.stage(), Some(Stage::Directory));
}

#[tokio::test]
async fn just_under_the_entry_limit_stays_classic() {
    let entries = (0..65_534).map(|i| ZipEntry::new(format!("{i}"), ""));
    let options = ArchiveOptions::default().compress(false).zip64(false);
    let archive = create_zip(entries, &options).await.unwrap();

    let tail = &archive[archive.len() - 22..];
    assert_eq!(u16::from_le_bytes([tail[10], tail[11]]), 65_534);
}
