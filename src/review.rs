//! Title-to-filename matching for PDFs that no citation key could claim.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::normalize::normalize_spaced;
use crate::scoring::partial_ratio;

pub const REVIEW_LOG_HEADER: [&str; 5] = ["Key", "Title", "Matched PDF", "Score", "Action"];

/// Best partial-ratio match of `title` against the PDF file stems.
/// Ties keep the earlier file.
pub fn best_pdf_match<'a>(title: &str, pdfs: &'a [PathBuf]) -> Option<(&'a Path, f64)> {
    let subject = normalize_spaced(title);
    if subject.is_empty() {
        return None;
    }
    let mut best: Option<(&Path, f64)> = None;
    for pdf in pdfs {
        let stem = pdf.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let score = partial_ratio(&subject, &normalize_spaced(&stem));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((pdf.as_path(), score));
        }
    }
    best
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnmatchedRow {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Title", default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRow {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Matched PDF")]
    pub matched_pdf: String,
    #[serde(rename = "Score")]
    pub score: String,
    #[serde(rename = "Action")]
    pub action: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReviewOptions {
    pub threshold: f64,
    /// Move instead of copy.
    pub move_files: bool,
    pub dry_run: bool,
}

/// Copy (or move) the best PDF for each unmatched row into `review_dir`.
/// Rows scoring below the threshold are logged as "No match found".
pub fn review_unmatched(
    rows: &[UnmatchedRow],
    pdfs: &[PathBuf],
    review_dir: &Path,
    opts: ReviewOptions,
) -> Result<Vec<ReviewRow>> {
    if !opts.dry_run {
        std::fs::create_dir_all(review_dir).map_err(|e| SyncError::io(review_dir, e))?;
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let matched = best_pdf_match(&row.title, pdfs).filter(|(_, s)| *s >= opts.threshold);
        let Some((pdf, score)) = matched else {
            info!(key = %row.key, "no PDF above threshold");
            out.push(ReviewRow {
                key: row.key.clone(),
                title: row.title.clone(),
                matched_pdf: String::new(),
                score: String::new(),
                action: "No match found".to_string(),
            });
            continue;
        };

        let name = pdf.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dest = review_dir.join(&name);
        let action = if opts.dry_run {
            if opts.move_files { "Would move" } else { "Would copy" }.to_string()
        } else if dest.exists() {
            "Already in review".to_string()
        } else {
            let result = if opts.move_files {
                std::fs::rename(pdf, &dest)
            } else {
                std::fs::copy(pdf, &dest).map(|_| ())
            };
            match result {
                Ok(()) if opts.move_files => "Moved".to_string(),
                Ok(()) => "Copied".to_string(),
                Err(e) => {
                    warn!(pdf = %pdf.display(), error = %e, "review copy failed");
                    format!("Failed: {e}")
                }
            }
        };

        out.push(ReviewRow {
            key: row.key.clone(),
            title: row.title.clone(),
            matched_pdf: name,
            score: format!("{:.2}", score),
            action,
        });
    }
    Ok(out)
}
