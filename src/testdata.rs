//! Random entry sets for exercising the assembler.
//!
//! Each set has at least one entry and keeps growing with probability
//! 0.667. Entry lengths are drawn below 16, 1024 or 65536 bytes, so tiny,
//! small and multi-block payloads all show up. Half the entries are
//! repetitive text (`f_{i}.txt`), half are random bytes (`f_{i}.dat`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::zip::ZipEntry;

pub const SAMPLE_TEXT: &str = "The quick brown fox jumps over the lazy dog.\n";

const MAX_LENGTHS: [usize; 3] = [16, 1024, 65536];
const CONTINUE_PROBABILITY: f64 = 0.667;

pub struct TestDataGenerator<R: Rng> {
    rng: R,
}

impl TestDataGenerator<StdRng> {
    /// Reproducible generator.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> TestDataGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Generate one entry set.
    pub fn entries(&mut self) -> Vec<ZipEntry> {
        let mut entries = Vec::new();
        loop {
            let i = entries.len() + 1;
            let max = MAX_LENGTHS[self.rng.random_range(0..MAX_LENGTHS.len())];
            let len = self.rng.random_range(0..max);

            let entry = if self.rng.random_bool(0.5) {
                ZipEntry::new(format!("f_{i}.txt"), text(len))
            } else {
                let mut data = vec![0u8; len];
                self.rng.fill(&mut data[..]);
                ZipEntry::new(format!("f_{i}.dat"), data)
            };
            entries.push(entry);

            if !self.rng.random_bool(CONTINUE_PROBABILITY) {
                return entries;
            }
        }
    }
}

/// `len` bytes of repeated sample text.
pub fn text(len: usize) -> String {
    SAMPLE_TEXT
        .repeat(len.div_ceil(SAMPLE_TEXT.len()))
        .chars()
        .take(len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_cut_to_length() {
        assert_eq!(text(0), "");
        assert_eq!(text(9), "The quick");
        assert_eq!(text(100).len(), 100);
    }

    #[test]
    fn seeded_generators_agree() {
        let a = TestDataGenerator::seeded(42).entries();
        let b = TestDataGenerator::seeded(42).entries();
        assert_eq!(a, b);
    }

    #[test]
    fn entries_follow_naming_and_bounds() {
        let mut generator = TestDataGenerator::seeded(7);
        for _ in 0..50 {
            let entries = generator.entries();
            assert!(!entries.is_empty());
            for (i, entry) in entries.iter().enumerate() {
                let stem = format!("f_{}.", i + 1);
                assert!(entry.path.starts_with(&stem), "{}", entry.path);
                assert!(entry.data.len() < 65536);
                if entry.path.ends_with(".txt") {
                    assert!(SAMPLE_TEXT.repeat(1500).as_bytes().starts_with(&entry.data));
                } else {
                    assert!(entry.path.ends_with(".dat"));
                }
            }
        }
    }
}
