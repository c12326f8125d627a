use std::path::PathBuf;

use crate::llm::LlmError;

/// Errors raised while reading a body document
#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized text encoding: {}", .0.display())]
    UnknownEncoding(PathBuf),

    #[error("Failed to parse DOCX {}: {message}", .path.display())]
    Docx { path: PathBuf, message: String },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
}

/// Errors raised by one attempt of the per-folder pipeline
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Document is empty: {}", .0.display())]
    EmptyDocument(PathBuf),

    #[error("No images could be processed")]
    NoImagesProcessed,

    #[error("Input directory does not exist: {}", .0.display())]
    MissingInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, PublishError>;
