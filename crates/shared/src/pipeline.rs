//! The per-folder publishing pipeline and the batch loop around it.
//!
//! One folder is one unit of work: validate, read, rewrite, title, stylize,
//! write, archive. Any failure after validation retries the whole folder.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, PROMPT_DIR_NAME};
use crate::document::read_document;
use crate::error::{PublishError, Result};
use crate::folder::{validate_folder, FolderManifest, ValidationIssue};
use crate::imaging::Stylizer;
use crate::llm::ContentWriter;
use crate::naming::{archive_folder, create_output_folder, unique_file_path};

pub const BODY_OUTPUT_FILE: &str = "正文.md";
pub const TITLE_OUTPUT_FILE: &str = "标题.txt";

/// Directory and retry settings for a batch run
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub folder_delay: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub stylizer: Stylizer,
}

impl From<&Config> for BatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            output_dir: config.output_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            folder_delay: config.folder_delay,
            retry_delay: config.retry_delay,
            max_retries: config.max_retries.max(1),
            stylizer: Stylizer::new(config.filter, config.border_size),
        }
    }
}

/// How one folder ended up
#[derive(Debug)]
pub enum FolderOutcome {
    Published {
        output: PathBuf,
        archived: Option<PathBuf>,
    },
    Invalid(Vec<ValidationIssue>),
    Failed(String),
}

impl FolderOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, FolderOutcome::Published { .. })
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<PathBuf>,
}

pub struct BatchProcessor {
    settings: BatchSettings,
    writer: ContentWriter,
}

impl BatchProcessor {
    pub fn new(settings: BatchSettings, writer: ContentWriter) -> Self {
        Self { settings, writer }
    }

    /// Subfolders of the input directory that are candidates for publishing,
    /// sorted by name.
    pub fn discover_folders(&self) -> Result<Vec<PathBuf>> {
        let input = &self.settings.input_dir;
        if !input.is_dir() {
            return Err(PublishError::MissingInput(input.clone()));
        }

        let mut excluded: HashSet<String> = ["__pycache__", PROMPT_DIR_NAME]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for dir in [&self.settings.output_dir, &self.settings.processed_dir] {
            if let Some(name) = dir.file_name() {
                excluded.insert(name.to_string_lossy().into_owned());
            }
        }

        let mut folders: Vec<PathBuf> = fs::read_dir(input)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy())
                    .map(|name| !name.starts_with('.') && !excluded.contains(name.as_ref()))
                    .unwrap_or(false)
            })
            .collect();
        folders.sort();
        Ok(folders)
    }

    /// Processes every candidate folder in order, pausing between folders
    pub async fn run(&self) -> Result<RunSummary> {
        let folders = self.discover_folders()?;
        let mut summary = RunSummary {
            total: folders.len(),
            ..Default::default()
        };

        if folders.is_empty() {
            tracing::warn!(
                "No subfolders to process in {}",
                self.settings.input_dir.display()
            );
            return Ok(summary);
        }

        tracing::info!("Found {} folder(s) to process", folders.len());

        for (i, folder) in folders.iter().enumerate() {
            tracing::info!("Progress: {}/{}", i + 1, summary.total);

            if self.process_folder_with_retry(folder).await.is_published() {
                summary.succeeded += 1;
            } else {
                tracing::warn!("Skipping folder: {}", folder.display());
                summary.failed.push(folder.clone());
            }

            let delay = self.settings.folder_delay;
            if i + 1 < summary.total && !delay.is_zero() {
                tracing::info!("Waiting {:.1}s before the next folder...", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }
        }

        Ok(summary)
    }

    /// Validates `folder`, then runs the pipeline up to `max_retries` times.
    /// Validation problems are reported straight away without retrying.
    pub async fn process_folder_with_retry(&self, folder: &Path) -> FolderOutcome {
        let manifest = match validate_folder(folder) {
            Ok(manifest) => manifest,
            Err(issues) => {
                let reasons: Vec<String> = issues.iter().map(ToString::to_string).collect();
                tracing::error!(
                    "Folder validation failed for {}: {}",
                    folder.display(),
                    reasons.join(", ")
                );
                return FolderOutcome::Invalid(issues);
            }
        };

        let max_retries = self.settings.max_retries.max(1);
        for attempt in 1..=max_retries {
            tracing::info!(
                "Processing folder: {} (attempt {}/{})",
                folder.display(),
                attempt,
                max_retries
            );

            match self.publish(&manifest).await {
                Ok((output, archived)) => {
                    tracing::info!("Folder published: {} -> {}", folder.display(), output.display());
                    return FolderOutcome::Published { output, archived };
                }
                Err(e) if attempt == max_retries => {
                    tracing::error!("Folder failed after {} attempt(s): {}", attempt, e);
                    return FolderOutcome::Failed(e.to_string());
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} failed, retrying: {}",
                        attempt,
                        max_retries,
                        e
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }

        FolderOutcome::Failed("no attempts were made".to_string())
    }

    /// One attempt. The output folder is removed again if a later step fails
    /// or the attempt is dropped before it finishes.
    async fn publish(&self, manifest: &FolderManifest) -> Result<(PathBuf, Option<PathBuf>)> {
        let original = read_document(&manifest.document)?;
        if original.trim().is_empty() {
            return Err(PublishError::EmptyDocument(manifest.document.clone()));
        }
        tracing::info!("Original content: {} characters", original.chars().count());

        tracing::info!("Rewriting content...");
        let rewritten = self.writer.rewrite(&original).await?;

        tracing::info!("Generating title...");
        let title = self.writer.generate_title(&rewritten).await?;
        tracing::info!("Title: {}", title);

        let pending = PendingOutput::new(create_output_folder(&self.settings.output_dir, &title)?);
        tracing::debug!("Created output folder: {}", pending.path.display());

        self.write_outputs(manifest, &pending, &rewritten, &title).await?;
        let output = pending.commit();

        let archived = match archive_folder(&manifest.folder, &self.settings.processed_dir) {
            Ok(target) => {
                tracing::info!("Source folder archived to: {}", target.display());
                Some(target)
            }
            Err(e) => {
                tracing::warn!("Failed to archive source folder, output is complete: {}", e);
                None
            }
        };

        Ok((output, archived))
    }

    async fn write_outputs(
        &self,
        manifest: &FolderManifest,
        pending: &PendingOutput,
        body: &str,
        title: &str,
    ) -> Result<()> {
        let images = manifest.images.clone();
        let target = pending.path.clone();
        let stylizer = self.settings.stylizer;
        let cancelled = pending.cancelled.clone();
        let processed = tokio::task::spawn_blocking(move || {
            let processed = stylize_images(&stylizer, &images, &target, &cancelled);
            if cancelled.load(Ordering::SeqCst) {
                remove_partial_output(&target);
            }
            processed
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        if processed == 0 {
            return Err(PublishError::NoImagesProcessed);
        }
        tracing::info!("Processed {} image(s)", processed);

        fs::write(pending.path.join(BODY_OUTPUT_FILE), body)?;
        fs::write(pending.path.join(TITLE_OUTPUT_FILE), title)?;
        Ok(())
    }
}

/// Output folder of an attempt in progress. Dropping it uncommitted raises
/// the cancel flag for the image worker and deletes the folder.
struct PendingOutput {
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
    committed: bool,
}

impl PendingOutput {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cancelled: Arc::new(AtomicBool::new(false)),
            committed: false,
        }
    }

    fn commit(mut self) -> PathBuf {
        self.committed = true;
        self.path.clone()
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        remove_partial_output(&self.path);
    }
}

fn remove_partial_output(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

/// Stylizes each image into `output_dir` as JPEG; failures are logged and
/// skipped. Stops early once `cancelled` is set. Returns how many images
/// were written.
pub fn stylize_images(
    stylizer: &Stylizer,
    images: &[PathBuf],
    output_dir: &Path,
    cancelled: &AtomicBool,
) -> usize {
    let mut processed = 0;
    for source in images {
        if cancelled.load(Ordering::SeqCst) {
            tracing::info!("Image processing cancelled after {} image(s)", processed);
            break;
        }
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let dest = unique_file_path(output_dir, &stem, "jpg");

        match stylizer.process_file(source, &dest) {
            Ok(()) => {
                tracing::debug!("Image processed: {}", dest.display());
                processed += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to process image {}: {}", source.display(), e);
                let _ = fs::remove_file(&dest);
            }
        }
    }
    processed
}
