use anyhow::{Context, Result};
use clap::Parser;
use shared::{is_image_path, FilterKind, Stylizer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const OUTPUT_DIR_NAME: &str = "filtered_images";

#[derive(Parser)]
#[command(name = "filter-images")]
#[command(about = "Stylize every image under a directory into per-folder filtered_images/")]
struct Args {
    /// Root directory to walk (defaults to the current directory)
    root: Option<PathBuf>,

    /// Image filter: natural, warm, cool, soft, bright, clarity, grayscale, negative
    #[arg(short, long, default_value = "natural")]
    filter: FilterKind,

    /// Border width in pixels
    #[arg(short, long, default_value = "20")]
    border: u32,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    if !root.is_dir() {
        anyhow::bail!("Root directory does not exist: {}", root.display());
    }

    let stylizer = Stylizer::new(args.filter, args.border);
    println!("🖼️  Applying '{}' filter under {}", args.filter, root.display());

    let mut processed = 0usize;
    let mut errors = 0usize;

    for dir in image_directories(&root) {
        let images: Vec<PathBuf> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_image_path(p))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list {}: {}", dir.display(), e);
                continue;
            }
        };
        if images.is_empty() {
            continue;
        }

        let output_dir = dir.join(OUTPUT_DIR_NAME);
        if !output_dir.exists() {
            fs::create_dir_all(&output_dir)
                .with_context(|| format!("Failed to create {}", output_dir.display()))?;
            tracing::info!("Created output folder: {}", output_dir.display());
        }

        for image in images {
            let Some(name) = image.file_name() else {
                continue;
            };
            let dest = output_dir.join(name);
            match stylizer.process_file(&image, &dest) {
                Ok(()) => {
                    tracing::debug!("Saved {}", dest.display());
                    processed += 1;
                }
                Err(e) => {
                    tracing::warn!("Error processing {}: {}", image.display(), e);
                    errors += 1;
                }
            }
        }
    }

    println!(
        "✅ Processed {} image(s), encountered {} error(s)",
        processed, errors
    );
    Ok(())
}

/// Directories under `root` (inclusive), skipping any whose path mentions
/// `filtered_images`, so earlier output and copies of it are left alone
fn image_directories(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !entry.path().to_string_lossy().contains(OUTPUT_DIR_NAME))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_image_directories_skips_output_folders() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("trip/day1")).unwrap();
        fs::create_dir_all(dir.path().join("trip").join(OUTPUT_DIR_NAME).join("nested")).unwrap();
        fs::create_dir_all(dir.path().join("old_filtered_images_backup/day2")).unwrap();

        let mut dirs = image_directories(dir.path());
        dirs.sort();
        assert_eq!(
            dirs,
            vec![
                dir.path().to_path_buf(),
                dir.path().join("trip"),
                dir.path().join("trip/day1"),
            ]
        );
    }
}
