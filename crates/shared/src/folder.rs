use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::document::find_body_documents;
use crate::imaging::is_image_path;

/// Why an input folder cannot be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Missing,
    MultipleDocuments(Vec<PathBuf>),
    NoDocument,
    NoImages,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Missing => write!(f, "folder does not exist"),
            ValidationIssue::MultipleDocuments(docs) => {
                let names: Vec<String> = docs
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect();
                write!(f, "multiple body documents found ({})", names.join(", "))
            }
            ValidationIssue::NoDocument => write!(f, "no body document found"),
            ValidationIssue::NoImages => write!(f, "no image files found"),
        }
    }
}

/// Contents of a folder that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderManifest {
    pub folder: PathBuf,
    pub images: Vec<PathBuf>,
    pub document: PathBuf,
}

/// Checks that `folder` holds at least one image and exactly one body
/// document. Every problem found is reported, not just the first.
pub fn validate_folder(folder: &Path) -> Result<FolderManifest, Vec<ValidationIssue>> {
    if !folder.is_dir() {
        return Err(vec![ValidationIssue::Missing]);
    }

    let mut issues = Vec::new();

    let mut images: Vec<PathBuf> = match fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image_path(path))
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to list {}: {}", folder.display(), e);
            Vec::new()
        }
    };
    images.sort();

    let mut documents = find_body_documents(folder);
    let document = match documents.len() {
        0 => {
            issues.push(ValidationIssue::NoDocument);
            None
        }
        1 => documents.pop(),
        _ => {
            issues.push(ValidationIssue::MultipleDocuments(documents));
            None
        }
    };

    if images.is_empty() {
        issues.push(ValidationIssue::NoImages);
    }

    match document {
        Some(document) if issues.is_empty() => Ok(FolderManifest {
            folder: folder.to_path_buf(),
            images,
            document,
        }),
        _ => Err(issues),
    }
}
