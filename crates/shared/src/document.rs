//! Body document reading.
//!
//! Each input folder carries exactly one body document named `正文` with a
//! `.txt`, `.docx` or `.md` extension. Plain text may come from older Chinese
//! editors, so `.txt` decoding falls back through GBK and Big5.

use encoding_rs::{Encoding, BIG5, GBK, UTF_8};
use std::path::{Path, PathBuf};

use crate::error::DocumentError;

/// File names accepted as the body document, in lookup order
pub const BODY_DOCUMENT_NAMES: [&str; 3] = ["正文.txt", "正文.docx", "正文.md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Docx,
    Markdown,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Text),
            "docx" => Some(Self::Docx),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Reads the document at `path`, dispatching on its extension
pub fn read_document(path: &Path) -> Result<String, DocumentError> {
    match DocumentKind::from_path(path) {
        Some(DocumentKind::Text) => read_text(path),
        Some(DocumentKind::Docx) => read_docx(path),
        Some(DocumentKind::Markdown) => read_markdown(path),
        None => Err(DocumentError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        )),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, DocumentError> {
    std::fs::read(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_text(path: &Path) -> Result<String, DocumentError> {
    let bytes = read_bytes(path)?;
    decode_text(&bytes)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| DocumentError::UnknownEncoding(path.to_path_buf()))
}

/// Tries UTF-8, GBK and Big5 in turn; the first clean decode wins.
///
/// `encoding_rs` decodes GBK as GB18030, which maps the user-defined byte
/// areas to Private Use Area characters instead of failing. Big5 punctuation
/// lands in those areas, so a GBK result containing PUA characters is
/// rejected and Big5 gets its turn.
fn decode_text(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let candidates: [&'static Encoding; 3] = [UTF_8, GBK, BIG5];

    candidates.iter().find_map(|encoding| {
        let decoded = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
        if *encoding == GBK && decoded.chars().any(is_private_use) {
            tracing::debug!("GBK decode hit user-defined areas, trying next encoding");
            return None;
        }
        tracing::debug!("Decoded text as {}", encoding.name());
        Some(decoded.into_owned())
    })
}

fn is_private_use(c: char) -> bool {
    matches!(c, '\u{E000}'..='\u{F8FF}')
}

pub fn read_markdown(path: &Path) -> Result<String, DocumentError> {
    let bytes = read_bytes(path)?;
    String::from_utf8(bytes)
        .map(|text| text.trim().to_string())
        .map_err(|_| DocumentError::UnknownEncoding(path.to_path_buf()))
}

/// Extract paragraph text from a DOCX body, skipping blank paragraphs
pub fn read_docx(path: &Path) -> Result<String, DocumentError> {
    let bytes = read_bytes(path)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| DocumentError::Docx {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let paragraphs: Vec<String> = docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            docx_rs::DocumentChild::Paragraph(para) => Some(paragraph_text(para)),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .collect();

    tracing::debug!(
        "DOCX extracted: {} paragraphs from {}",
        paragraphs.len(),
        path.display()
    );

    Ok(paragraphs.join("\n"))
}

fn paragraph_text(para: &docx_rs::Paragraph) -> String {
    let mut output = String::new();
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run_text(run, &mut output),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = inner {
                        push_run_text(run, &mut output);
                    }
                }
            }
            _ => {}
        }
    }
    output
}

fn push_run_text(run: &docx_rs::Run, output: &mut String) {
    for run_child in &run.children {
        match run_child {
            docx_rs::RunChild::Text(text) => output.push_str(&text.text),
            docx_rs::RunChild::Tab(_) => output.push('\t'),
            _ => {}
        }
    }
}

/// Lists which body document names exist in `dir`
pub fn find_body_documents(dir: &Path) -> Vec<PathBuf> {
    BODY_DOCUMENT_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}
