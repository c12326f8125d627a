use anyhow::{Context, Result};
use clap::Parser;
use shared::{BatchProcessor, BatchSettings, Config, ContentWriter, FilterKind, FolderOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batch-publish")]
#[command(about = "Rewrite, title and stylize post folders, then archive the sources")]
struct Args {
    /// Directory whose subfolders are processed (overrides INPUT_FOLDER_PATH)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Root for generated folders (overrides OUTPUT_FOLDER_PATH)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Root for archived source folders (overrides PROCESSED_FOLDER_PATH)
    #[arg(short, long)]
    processed: Option<PathBuf>,

    /// Folder holding the prompt templates (overrides PROMPT_DIR)
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Seconds to wait between folders (overrides FOLDER_DELAY_SECONDS)
    #[arg(short, long)]
    delay: Option<f64>,

    /// Attempts per folder (overrides MAX_RETRIES)
    #[arg(short, long)]
    retries: Option<u32>,

    /// Image filter: natural, warm, cool, soft, bright, clarity, grayscale, negative
    #[arg(short, long, default_value = "natural")]
    filter: FilterKind,

    /// Border width in pixels
    #[arg(short, long, default_value = "20")]
    border: u32,

    /// Process only this folder instead of scanning the input directory
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(input) = &self.input {
            config.input_dir = input.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(processed) = &self.processed {
            config.processed_dir = processed.clone();
        }
        if let Some(prompt_dir) = &self.prompt_dir {
            config.prompt_dir = prompt_dir.clone();
        }
        if let Some(delay) = self.delay {
            config.folder_delay = Duration::try_from_secs_f64(delay)
                .with_context(|| format!("Invalid delay: {}", delay))?;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries.max(1);
        }
        config.filter = self.filter;
        config.border_size = self.border;
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = Config::from_env()?;
    args.apply(&mut config)?;

    println!("🚀 Batch publisher starting");
    println!("📁 Input:     {}", config.input_dir.display());
    println!("📁 Output:    {}", config.output_dir.display());
    println!("📁 Processed: {}", config.processed_dir.display());
    println!("⏱️  Delay between folders: {:.1}s", config.folder_delay.as_secs_f64());

    let writer = ContentWriter::from_config(&config)?;
    let processor = BatchProcessor::new(BatchSettings::from(&config), writer);

    tokio::select! {
        result = run(&processor, args.folder.as_deref()) => result,
        // dropping the run removes the half-written output folder, if any
        _ = tokio::signal::ctrl_c() => {
            println!("\n⏹️  Interrupted, stopping");
            Ok(())
        }
    }
}

async fn run(processor: &BatchProcessor, folder: Option<&std::path::Path>) -> Result<()> {
    if let Some(folder) = folder {
        return match processor.process_folder_with_retry(folder).await {
            FolderOutcome::Published { output, archived } => {
                println!("\n✅ Published to: {}", output.display());
                if let Some(archived) = archived {
                    println!("📦 Source archived to: {}", archived.display());
                }
                Ok(())
            }
            FolderOutcome::Invalid(issues) => {
                let reasons: Vec<String> = issues.iter().map(ToString::to_string).collect();
                anyhow::bail!("Folder is not publishable: {}", reasons.join(", "))
            }
            FolderOutcome::Failed(reason) => anyhow::bail!("Folder failed: {}", reason),
        };
    }

    let summary = processor
        .run()
        .await
        .context("Batch run failed")?;

    println!("\n{}", "=".repeat(50));
    println!("🏁 Batch complete");
    println!("✅ Published: {}/{}", summary.succeeded, summary.total);
    println!("❌ Failed: {}", summary.failed.len());
    for folder in &summary.failed {
        println!("  ✗ {}", folder.display());
    }

    Ok(())
}
