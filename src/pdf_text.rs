//! First-page text extraction with an OCR fallback.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::normalize::normalize;

/// Source of PDF text. The real implementation shells out for OCR;
/// tests substitute canned text.
pub trait PdfText: Sync {
    /// Raw text of the first page.
    fn first_page_text(&self, path: &Path) -> Result<String, String>;

    /// Write an OCR'd copy of `input` to `output`.
    fn ocr(&self, input: &Path, output: &Path) -> Result<(), String>;
}

/// `pdf-extract` for text, an external OCR tool for scanned files.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    pub ocr_command: String,
}

impl PdfExtractor {
    pub fn new(ocr_command: impl Into<String>) -> Self {
        Self {
            ocr_command: ocr_command.into(),
        }
    }
}

impl PdfText for PdfExtractor {
    fn first_page_text(&self, path: &Path) -> Result<String, String> {
        let bytes = std::fs::read(path).map_err(|e| format!("Cannot read PDF: {}", e))?;
        // pdf-extract panics on some malformed files
        let text = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(&bytes)
        }))
        .map_err(|_| "pdf-extract panicked".to_string())?
        .map_err(|e| format!("pdf-extract failed: {}", e))?;

        Ok(text.split('\u{c}').next().unwrap_or("").to_string())
    }

    fn ocr(&self, input: &Path, output: &Path) -> Result<(), String> {
        let status = Command::new(&self.ocr_command)
            .arg("--skip-text")
            .arg("--force-ocr")
            .arg(input)
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("Failed to run {}: {}", self.ocr_command, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {}", self.ocr_command, status))
        }
    }
}

/// Normalized match subject taken from a PDF's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSubject {
    /// Empty when nothing could be read.
    pub text: String,
    pub ocr: bool,
}

fn normalized_prefix(raw: &str, max_chars: usize) -> String {
    let head: String = raw.chars().take(max_chars).collect();
    normalize(&head)
}

/// First `max_chars` characters of page one, normalized. Falls back to OCR
/// when fewer than `min_chars` survive normalization.
pub fn content_subject(
    reader: &dyn PdfText,
    path: &Path,
    max_chars: usize,
    min_chars: usize,
) -> ContentSubject {
    let text = match reader.first_page_text(path) {
        Ok(raw) => normalized_prefix(&raw, max_chars),
        Err(e) => {
            debug!(file = %path.display(), error = %e, "text extraction failed");
            String::new()
        }
    };

    if text.chars().count() >= min_chars {
        return ContentSubject { text, ocr: false };
    }

    // The temporary file is removed when `scratch` drops, on every path
    let scratch = match tempfile::Builder::new()
        .prefix("bibsync-ocr-")
        .suffix(".pdf")
        .tempfile()
    {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "cannot create OCR scratch file");
            return ContentSubject {
                text: String::new(),
                ocr: false,
            };
        }
    };

    let ocr_text = reader
        .ocr(path, scratch.path())
        .and_then(|()| reader.first_page_text(scratch.path()));
    match ocr_text {
        Ok(raw) => ContentSubject {
            text: normalized_prefix(&raw, max_chars),
            ocr: true,
        },
        Err(e) => {
            warn!(file = %path.display(), error = %e, "OCR failed");
            ContentSubject {
                text: String::new(),
                ocr: false,
            }
        }
    }
}
