// Public modules
pub mod config;
pub mod document;
pub mod error;
pub mod folder;
pub mod imaging;
pub mod llm;
pub mod naming;
pub mod pipeline;

// Re-export commonly used types
pub use config::Config;
pub use document::read_document;
pub use error::{DocumentError, PublishError};
pub use folder::{validate_folder, FolderManifest, ValidationIssue};
pub use imaging::{is_image_path, FilterKind, Stylizer};
pub use llm::{ChatProvider, ContentWriter, FallbackChain, LlmError, OpenAiCompatible};
pub use naming::{archive_folder, create_output_folder, safe_title, unique_path};
pub use pipeline::{BatchProcessor, BatchSettings, FolderOutcome, RunSummary};
