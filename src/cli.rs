use clap::{Parser, ValueEnum};

use crate::options::ArchiveOptions;
use crate::source::{Backend, Chunking, DeflateFactory};

/// How compressed entry data is pulled into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChunkingArg {
    /// Raw DEFLATE in encoder-sized chunks
    Deflate,
    /// gzip backend, one byte per pull
    Byte,
    /// gzip backend, everything in one pull
    Single,
    /// gzip backend in encoder-sized chunks
    Gzip,
}

impl ChunkingArg {
    /// The adapters exercised by stress mode.
    pub const STRESS: [ChunkingArg; 3] = [ChunkingArg::Byte, ChunkingArg::Single, ChunkingArg::Deflate];

    pub fn factory(self, level: u32) -> DeflateFactory {
        let (backend, chunking) = match self {
            ChunkingArg::Deflate => (Backend::Deflate, Chunking::Natural),
            ChunkingArg::Byte => (Backend::Gzip, Chunking::ByteByByte),
            ChunkingArg::Single => (Backend::Gzip, Chunking::SingleShot),
            ChunkingArg::Gzip => (Backend::Gzip, Chunking::Natural),
        };
        DeflateFactory::new(level).backend(backend).chunking(chunking)
    }
}

#[derive(Parser, Debug)]
#[command(name = "streamzip")]
#[command(version)]
#[command(about = "Build ZIP archives by streaming compressed entry data", long_about = None)]
#[command(after_help = "Examples:\n  \
  streamzip out.zip a.txt b.bin       deflate two files into out.zip\n  \
  streamzip -0 -T out.zip docs/*      store files, then verify the result\n  \
  streamzip --stress 100 testfiles    write and verify random archives")]
pub struct Cli {
    /// Archive to write (with --stress: output directory)
    #[arg(value_name = "ZIPFILE")]
    pub archive: String,

    /// Files to add
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Store only, no compression
    #[arg(short = '0')]
    pub store: bool,

    /// Chunk source used for compressed entries
    #[arg(short = 'c', long, value_enum, default_value_t = ChunkingArg::Deflate)]
    pub chunking: ChunkingArg,

    /// Compression level
    #[arg(short = 'l', long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// Junk paths (store only file names)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Test the archive after writing it
    #[arg(short = 'T')]
    pub test: bool,

    /// Also test with an external `unzip -t`
    #[arg(long)]
    pub unzip: bool,

    /// Fail instead of writing ZIP64 records
    #[arg(long)]
    pub no_zip64: bool,

    /// Write N random archives per mode into ZIPFILE and test each
    #[arg(long, value_name = "N")]
    pub stress: Option<usize>,

    /// Seed for --stress
    #[arg(long, requires = "stress")]
    pub seed: Option<u64>,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => "info",
            1 => "warn",
            _ => "error",
        }
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        self.options_for(!self.store, self.chunking)
    }

    pub fn options_for(&self, compress: bool, chunking: ChunkingArg) -> ArchiveOptions {
        ArchiveOptions::default()
            .compress(compress)
            .zip64(!self.no_zip64)
            .source(chunking.factory(self.level))
    }

    /// Name an input file gets inside the archive.
    pub fn entry_name(&self, file: &str) -> String {
        let name = if self.junk_paths {
            std::path::Path::new(file)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file.to_string())
        } else {
            file.replace('\\', "/")
        };
        name.trim_start_matches("./").trim_start_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["streamzip", "-0", "-T", "-c", "byte", "out.zip", "a", "b"]);
        assert!(cli.store);
        assert!(cli.test);
        assert_eq!(cli.chunking, ChunkingArg::Byte);
        assert_eq!(cli.files, ["a", "b"]);
        assert!(!cli.archive_options().is_compressed());
    }

    #[test]
    fn level_is_bounded() {
        assert!(Cli::try_parse_from(["streamzip", "-l", "10", "out.zip"]).is_err());
        assert_eq!(Cli::parse_from(["streamzip", "-l", "9", "out.zip"]).level, 9);
    }

    #[test]
    fn seed_requires_stress() {
        assert!(Cli::try_parse_from(["streamzip", "--seed", "1", "dir"]).is_err());
        let cli = Cli::parse_from(["streamzip", "--stress", "3", "--seed", "1", "dir"]);
        assert_eq!((cli.stress, cli.seed), (Some(3), Some(1)));
    }

    #[test]
    fn entry_names() {
        let cli = Cli::parse_from(["streamzip", "out.zip"]);
        assert_eq!(cli.entry_name("./docs/a.txt"), "docs/a.txt");
        assert_eq!(cli.entry_name("/abs/b.txt"), "abs/b.txt");

        let junk = Cli::parse_from(["streamzip", "-j", "out.zip"]);
        assert_eq!(junk.entry_name("docs/a.txt"), "a.txt");
    }
}
