//! Rename PDFs to `<citekey>.pdf`.
//!
//! Matching is pure and may run in parallel; renames are applied afterwards,
//! one file at a time in sorted order, so collisions resolve the same way on
//! every run.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::bibliography::CandidateIndex;
use crate::config::MatchingConfig;
use crate::error::{Result, SyncError};
use crate::models::{BibEntry, MatchOutcome, MatchResult};
use crate::normalize::{normalize, safe_file_stem};
use crate::pdf_text::{content_subject, PdfText};
use crate::progress::{create_progress_bar, log_progress};
use crate::scoring::select_best;

/// Stems shaped like `Author -2019- Title`.
static AUTHOR_YEAR_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?) -(\d{4})- (.+)$").unwrap());

/// Characters of the title part compared in pattern mode.
const PATTERN_TITLE_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenameMode {
    /// Weighted author/year/title score against the file name.
    Fuzzy,
    /// Author, year and title prefix must all occur in the file name.
    Exact,
    /// `Author -YYYY- Title` file names.
    Pattern,
    /// First-page text, with OCR for scanned files.
    Content,
}

/// Outcome of matching one file, before any side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub file: PathBuf,
    pub key: Option<String>,
    pub score: f64,
    pub ocr: bool,
    pub unreadable: bool,
}

impl Decision {
    fn matched(file: &Path, key: Option<String>, score: f64) -> Self {
        Self {
            file: file.to_path_buf(),
            key,
            score,
            ocr: false,
            unreadable: false,
        }
    }
}

/// Per-run matching state built once from the bibliography.
pub struct Matcher<'a> {
    mode: RenameMode,
    config: &'a MatchingConfig,
    index: CandidateIndex,
}

impl<'a> Matcher<'a> {
    pub fn new(mode: RenameMode, entries: &[BibEntry], config: &'a MatchingConfig) -> Self {
        let title_words = match mode {
            RenameMode::Fuzzy => config.filename.title_words,
            RenameMode::Exact => config.exact_title_words,
            RenameMode::Pattern => config.pattern_title_words,
            RenameMode::Content => config.content.title_words,
        };
        Self {
            mode,
            config,
            index: CandidateIndex::build(entries, title_words),
        }
    }

    /// Match on the file stem only.
    pub fn match_stem(&self, file: &Path) -> Decision {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.mode {
            RenameMode::Fuzzy | RenameMode::Content => {
                let (best, top) =
                    select_best(self.index.candidates(), &normalize(&stem), &self.config.filename);
                match best {
                    Some(m) => Decision::matched(file, Some(m.key), m.score),
                    None => Decision::matched(file, None, top),
                }
            }
            RenameMode::Exact => {
                let key = self
                    .index
                    .exact_match(&normalize(&stem))
                    .map(|c| c.key.clone());
                let score = if key.is_some() { 1.0 } else { 0.0 };
                Decision::matched(file, key, score)
            }
            RenameMode::Pattern => {
                let key = self.pattern_match(&stem);
                let score = if key.is_some() { 1.0 } else { 0.0 };
                Decision::matched(file, key, score)
            }
        }
    }

    fn pattern_match(&self, stem: &str) -> Option<String> {
        let caps = AUTHOR_YEAR_TITLE.captures(stem)?;
        let author = normalize(caps[1].trim());
        let year = &caps[2];
        let title_part: String = caps[3].chars().take(PATTERN_TITLE_CHARS).collect();
        let title = normalize(&title_part);

        self.index
            .candidates()
            .iter()
            .filter(|c| {
                !c.author.is_empty()
                    && !c.title_prefix.is_empty()
                    && author.contains(c.author.as_str())
                    && c.year.as_deref() == Some(year)
                    && title.contains(c.title_prefix.as_str())
            })
            .map(|c| c.key.clone())
            .min()
    }

    /// Match on first-page content, OCR'ing when the text layer is missing.
    pub fn match_content(&self, file: &Path, reader: &dyn PdfText) -> Decision {
        let subject = content_subject(
            reader,
            file,
            self.config.content_chars,
            self.config.min_text_chars,
        );
        if subject.text.is_empty() {
            return Decision {
                file: file.to_path_buf(),
                key: None,
                score: 0.0,
                ocr: subject.ocr,
                unreadable: true,
            };
        }
        let (best, top) = select_best(self.index.candidates(), &subject.text, &self.config.content);
        let (key, score) = match best {
            Some(m) => (Some(m.key), m.score),
            None => (None, top),
        };
        Decision {
            file: file.to_path_buf(),
            key,
            score,
            ocr: subject.ocr,
            unreadable: false,
        }
    }

    /// Match every file. Filename modes run on the rayon pool; content mode
    /// runs sequentially because OCR is already CPU-bound.
    pub fn plan(&self, files: &[PathBuf], reader: &dyn PdfText) -> Vec<Decision> {
        let pb = create_progress_bar(files.len() as u64, "Matching");
        let total = files.len() as u64;

        let decisions: Vec<Decision> = match self.mode {
            RenameMode::Content => files
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    let d = self.match_content(f, reader);
                    pb.inc(1);
                    log_progress("content", i as u64 + 1, total, 25);
                    d
                })
                .collect(),
            _ => files
                .par_iter()
                .map(|f| {
                    let d = self.match_stem(f);
                    pb.inc(1);
                    d
                })
                .collect(),
        };

        pb.finish_and_clear();
        decisions
    }
}

/// PDFs directly inside `dir`, sorted by path.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in read {
        let path = entry.map_err(|e| SyncError::io(dir, e))?.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Apply decisions in order. A target that exists, or that an earlier file
/// in this run already claimed, is never overwritten.
pub fn apply(decisions: Vec<Decision>, pdf_dir: &Path, dry_run: bool) -> Vec<MatchResult> {
    let mut claimed: FxHashSet<PathBuf> = FxHashSet::default();
    let mut results = Vec::with_capacity(decisions.len());

    for d in decisions {
        let Some(key) = d.key.clone() else {
            let outcome = if d.unreadable {
                MatchOutcome::Unreadable
            } else {
                MatchOutcome::NoMatch
            };
            results.push(MatchResult {
                file: d.file,
                key: None,
                new_name: None,
                score: d.score,
                outcome,
                ocr: d.ocr,
            });
            continue;
        };

        let new_name = format!("{}.pdf", safe_file_stem(&key));
        let target = pdf_dir.join(&new_name);

        let outcome = if d.file == target || target.exists() || claimed.contains(&target) {
            MatchOutcome::ExistsSkipped
        } else if dry_run {
            claimed.insert(target.clone());
            MatchOutcome::RenamePlanned
        } else {
            match std::fs::rename(&d.file, &target) {
                Ok(()) => {
                    debug!(from = %d.file.display(), to = %target.display(), "renamed");
                    claimed.insert(target.clone());
                    MatchOutcome::Renamed
                }
                Err(e) => {
                    warn!(file = %d.file.display(), error = %e, "rename failed");
                    MatchOutcome::Failed
                }
            }
        };

        results.push(MatchResult {
            file: d.file,
            key: Some(key),
            new_name: Some(new_name),
            score: d.score,
            outcome,
            ocr: d.ocr,
        });
    }

    results
}
