//! End-to-end tests: build archives, read them back with the verifier and
//! with the third-party `zip` crate.

use std::io::{Cursor, Read};
use std::sync::Arc;

use chrono::NaiveDate;
use streamzip::{
    ArchiveOptions, Backend, Chunking, DeflateFactory, MemoryReader, TestDataGenerator, ZipEntry,
    ZipVerifier, create_zip,
};

fn fixed_options(compress: bool) -> ArchiveOptions {
    let when = NaiveDate::from_ymd_opt(2023, 11, 2)
        .unwrap()
        .and_hms_opt(8, 15, 42)
        .unwrap();
    ArchiveOptions::default().compress(compress).modified(when)
}

fn sample_entries() -> Vec<ZipEntry> {
    vec![
        ZipEntry::new("readme.txt", "The quick brown fox jumps over the lazy dog.\n".repeat(40)),
        ZipEntry::new("bin/zeros.dat", vec![0u8; 70_000]),
        ZipEntry::new("empty.txt", ""),
        ZipEntry::new("ünïcödé/naïve.txt", "unicode name"),
        ZipEntry::new("noise.dat", noise(5000)),
    ]
}

fn noise(len: u32) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
        .collect()
}

fn read_with_zip_crate(archive: &[u8]) -> Vec<(String, Vec<u8>, u32)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data, file.crc32())
        })
        .collect()
}

#[tokio::test]
async fn round_trip_through_verifier() {
    for compress in [false, true] {
        let archive = create_zip(sample_entries(), &fixed_options(compress)).await.unwrap();
        let verifier = ZipVerifier::new(Arc::new(MemoryReader::new(archive)));

        let report = verifier.verify().await.unwrap();
        assert_eq!(report.entries, 5);
        assert!(!report.zip64);

        let files = verifier.list_files().await.unwrap();
        for (file, original) in files.iter().zip(sample_entries()) {
            assert_eq!(file.file_name, original.path);
            assert_eq!(file.crc32, crc32fast::hash(&original.data));
            assert_eq!(verifier.extract_to_memory(file).await.unwrap(), original.data);
        }
    }
}

#[tokio::test]
async fn accepted_by_zip_crate() {
    for compress in [false, true] {
        let archive = create_zip(sample_entries(), &fixed_options(compress)).await.unwrap();
        let read = read_with_zip_crate(&archive);

        assert_eq!(read.len(), 5);
        for ((name, data, crc), original) in read.into_iter().zip(sample_entries()) {
            assert_eq!(name, original.path);
            assert_eq!(data, original.data);
            assert_eq!(crc, crc32fast::hash(&original.data));
        }
    }
}

#[tokio::test]
async fn chunking_does_not_change_the_archive() {
    let mut archives = Vec::new();
    for backend in [Backend::Deflate, Backend::Gzip] {
        for chunking in [Chunking::Natural, Chunking::ByteByByte, Chunking::SingleShot] {
            let options = fixed_options(true)
                .source(DeflateFactory::new(6).backend(backend).chunking(chunking));
            archives.push(create_zip(sample_entries(), &options).await.unwrap());
        }
    }
    assert!(archives.iter().all(|a| *a == archives[0]));
}

#[tokio::test]
async fn random_entry_sets_survive_every_mode() {
    let mut generator = TestDataGenerator::seeded(2024);
    for compress in [false, true] {
        for chunking in [Chunking::ByteByByte, Chunking::SingleShot, Chunking::Natural] {
            let options = fixed_options(compress)
                .source(DeflateFactory::default().backend(Backend::Gzip).chunking(chunking));
            for _ in 0..5 {
                let entries = generator.entries();
                let archive = create_zip(entries.clone(), &options).await.unwrap();

                ZipVerifier::new(Arc::new(MemoryReader::new(archive.clone())))
                    .verify()
                    .await
                    .unwrap();
                let read = read_with_zip_crate(&archive);
                assert_eq!(read.len(), entries.len());
                for ((name, data, _), entry) in read.into_iter().zip(entries) {
                    assert_eq!(name, entry.path);
                    assert_eq!(data, entry.data);
                }
            }
        }
    }
}

#[tokio::test]
async fn many_entries_fall_back_to_zip64() {
    let entries = (0..70_000).map(|i| ZipEntry::new(format!("e{i}"), ""));
    let archive = create_zip(entries, &fixed_options(false)).await.unwrap();

    let verifier = ZipVerifier::new(Arc::new(MemoryReader::new(archive.clone())));
    let report = verifier.verify().await.unwrap();
    assert_eq!(report.entries, 70_000);
    assert!(report.zip64);

    // Classic end record saturates the counts.
    let eocd = &archive[archive.len() - 22..];
    assert_eq!(&eocd[8..10], &[0xFF, 0xFF]);
    assert_eq!(&eocd[10..12], &[0xFF, 0xFF]);

    let zip = zip::ZipArchive::new(Cursor::new(&archive[..])).unwrap();
    assert_eq!(zip.len(), 70_000);
}

#[tokio::test]
async fn verify_from_disk() {
    let archive = create_zip(sample_entries(), &fixed_options(true)).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("z_0.zip");
    tokio::fs::write(&path, &archive).await.unwrap();

    let reader = streamzip::LocalFileReader::new(&path).unwrap();
    let report = ZipVerifier::new(Arc::new(reader)).verify().await.unwrap();
    assert_eq!(report.entries, 5);
    assert_eq!(report.data_descriptors, 5);
}
