//! Main entry point for the streamzip CLI application.
//!
//! Builds an archive from files on disk, or in stress mode writes many
//! random archives and tests each of them.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamzip::cli::ChunkingArg;
use streamzip::{Cli, LocalFileReader, TestDataGenerator, ZipEntry, ZipVerifier, create_zip};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.stress {
        Some(count) => stress(&cli, count).await,
        None => build(&cli).await,
    }
}

/// Build one archive from the files named on the command line.
async fn build(cli: &Cli) -> Result<()> {
    if cli.files.is_empty() {
        warn!("no input files, writing an empty archive");
    }

    let mut entries = Vec::with_capacity(cli.files.len());
    for file in &cli.files {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {file}"))?;
        let name = cli.entry_name(file);
        if !cli.is_quiet() {
            println!("  adding: {name}");
        }
        entries.push(ZipEntry::new(name, data));
    }

    let archive = create_zip(entries, &cli.archive_options()).await?;
    let path = PathBuf::from(&cli.archive);
    tokio::fs::write(&path, &archive)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), size = %format_size(archive.len() as u64), "archive written");

    if cli.test || cli.unzip {
        test_archive(cli, &path).await?;
    }
    Ok(())
}

/// Write `count` random archives for every mode combination and test each.
async fn stress(cli: &Cli, count: usize) -> Result<()> {
    let dir = PathBuf::from(&cli.archive);
    tokio::fs::create_dir_all(&dir).await?;

    let mut generator = match cli.seed {
        Some(seed) => TestDataGenerator::seeded(seed),
        None => TestDataGenerator::seeded(rand::random()),
    };

    for compress in [false, true] {
        if !cli.is_very_quiet() {
            println!("compress: {compress}");
        }
        for chunking in ChunkingArg::STRESS {
            if !cli.is_very_quiet() {
                println!("  chunking: {chunking:?}");
            }
            let options = cli.options_for(compress, chunking);
            for i in 0..count {
                let entries = generator.entries();
                let archive = create_zip(entries, &options).await?;
                let path = dir.join(format!("z_{i}.zip"));
                tokio::fs::write(&path, &archive).await?;
                test_archive(cli, &path)
                    .await
                    .with_context(|| format!("compress={compress} chunking={chunking:?} archive {i}"))?;
            }
        }
    }

    if !cli.is_very_quiet() {
        println!("{} archives ok", count * 2 * ChunkingArg::STRESS.len());
    }
    Ok(())
}

async fn test_archive(cli: &Cli, path: &Path) -> Result<()> {
    let verifier = ZipVerifier::new(Arc::new(LocalFileReader::new(path)?));
    let report = verifier
        .verify()
        .await
        .with_context(|| format!("{} failed verification", path.display()))?;
    if !cli.is_quiet() {
        println!(
            "No errors detected in {} ({} entries, {} -> {}{})",
            path.display(),
            report.entries,
            format_size(report.uncompressed_bytes),
            format_size(report.compressed_bytes),
            if report.zip64 { ", zip64" } else { "" }
        );
    }

    if cli.unzip {
        let output = tokio::process::Command::new("unzip")
            .arg("-t")
            .arg(path)
            .output()
            .await
            .context("Failed to run unzip")?;
        if !output.status.success() {
            bail!(
                "unzip -t {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stdout)
            );
        }
    }
    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
