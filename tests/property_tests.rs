//! Property-based tests using proptest
//!
//! Arbitrary entry sets must round-trip through every compression and
//! chunking mode, and chunking must never change the archive bytes.

use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use streamzip::{
    ArchiveOptions, Backend, Chunking, DeflateFactory, MemoryReader, ZipEntry, ZipVerifier,
    create_zip,
};

/// Strategy for valid entry paths
fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9_.-]{1,24}",
        "[a-z]{1,8}/[a-z0-9_.]{1,16}",
        "[a-zé日ß]{1,12}",
    ]
}

/// Strategy for entry payloads: empty, repetitive, or random
fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        (any::<u8>(), 0..5000usize).prop_map(|(b, n)| vec![b; n]),
        prop::collection::vec(any::<u8>(), 0..2048),
    ]
}

fn entries_strategy() -> impl Strategy<Value = Vec<ZipEntry>> {
    prop::collection::vec((path_strategy(), data_strategy()), 0..8).prop_map(|items| {
        items
            .into_iter()
            .map(|(path, data)| ZipEntry::new(path, data))
            .collect()
    })
}

fn chunking_strategy() -> impl Strategy<Value = Chunking> {
    prop_oneof![
        Just(Chunking::Natural),
        Just(Chunking::ByteByByte),
        Just(Chunking::SingleShot),
    ]
}

fn options(compress: bool, backend: Backend, chunking: Chunking) -> ArchiveOptions {
    let when = NaiveDate::from_ymd_opt(2020, 2, 29)
        .unwrap()
        .and_hms_opt(4, 20, 0)
        .unwrap();
    ArchiveOptions::default()
        .compress(compress)
        .modified(when)
        .source(DeflateFactory::new(6).backend(backend).chunking(chunking))
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn round_trip(
        entries in entries_strategy(),
        compress in any::<bool>(),
        gzip in any::<bool>(),
        chunking in chunking_strategy(),
    ) {
        let backend = if gzip { Backend::Gzip } else { Backend::Deflate };
        let (report, extracted) = block_on(async {
            let archive = create_zip(entries.clone(), &options(compress, backend, chunking))
                .await
                .unwrap();
            let verifier = ZipVerifier::new(Arc::new(MemoryReader::new(archive)));
            let report = verifier.verify().await.unwrap();
            let mut extracted = Vec::new();
            for file in verifier.list_files().await.unwrap() {
                let data = verifier.extract_to_memory(&file).await.unwrap();
                extracted.push((file.file_name, file.crc32, data));
            }
            (report, extracted)
        });

        prop_assert_eq!(report.entries, entries.len());
        for ((name, crc, data), entry) in extracted.into_iter().zip(&entries) {
            prop_assert_eq!(&name, &entry.path);
            prop_assert_eq!(crc, crc32fast::hash(&entry.data));
            prop_assert_eq!(&data[..], &entry.data[..]);
        }
    }

    #[test]
    fn chunking_invariance(entries in entries_strategy(), compress in any::<bool>()) {
        let (byte, single) = block_on(async {
            let byte = create_zip(
                entries.clone(),
                &options(compress, Backend::Gzip, Chunking::ByteByByte),
            )
            .await
            .unwrap();
            let single = create_zip(
                entries.clone(),
                &options(compress, Backend::Gzip, Chunking::SingleShot),
            )
            .await
            .unwrap();
            (byte, single)
        });
        prop_assert_eq!(byte, single);
    }
}
