use std::fs;
use std::path::Path;

use bibsync::bibliography::load_bibtex;
use bibsync::config::MatchingConfig;
use bibsync::models::MatchOutcome;
use bibsync::pdf_text::PdfText;
use bibsync::rename::{apply, list_pdfs, Matcher, RenameMode};
use bibsync::report::write_rename_log;

const LIBRARY: &str = r#"
@article{smith2020,
  author = {Smith, John},
  title = {Deep Learning Systems},
  year = {2020}
}

@book{jones2018,
  author = {Jones, Mary},
  title = {Bayesian Inference in Practice: A Guide},
  year = {2018}
}
"#;

/// Filename modes never read the PDF.
struct NoText;

impl PdfText for NoText {
    fn first_page_text(&self, _path: &Path) -> Result<String, String> {
        Err("no text layer".to_string())
    }

    fn ocr(&self, _input: &Path, _output: &Path) -> Result<(), String> {
        Err("ocr disabled".to_string())
    }
}

fn setup(pdfs: &[&str]) -> (tempfile::TempDir, Vec<bibsync::models::BibEntry>) {
    let dir = tempfile::tempdir().unwrap();
    let bib = dir.path().join("library.bib");
    fs::write(&bib, LIBRARY).unwrap();
    fs::create_dir(dir.path().join("pdfs")).unwrap();
    for name in pdfs {
        fs::write(dir.path().join("pdfs").join(name), b"%PDF-1.4").unwrap();
    }
    let entries = load_bibtex(&bib).unwrap();
    (dir, entries)
}

fn log_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

#[test]
fn test_fuzzy_rename_and_log() {
    let (dir, entries) = setup(&["smith-2020-deep-learning.pdf", "qqq.pdf"]);
    let pdf_dir = dir.path().join("pdfs");
    let config = MatchingConfig::default();

    let files = list_pdfs(&pdf_dir).unwrap();
    let matcher = Matcher::new(RenameMode::Fuzzy, &entries, &config);
    let results = apply(matcher.plan(&files, &NoText), &pdf_dir, false);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].outcome, MatchOutcome::NoMatch);
    assert_eq!(results[1].outcome, MatchOutcome::Renamed);
    assert!(pdf_dir.join("smith2020.pdf").exists());
    assert!(!pdf_dir.join("smith-2020-deep-learning.pdf").exists());
    assert!(pdf_dir.join("qqq.pdf").exists());

    let log = dir.path().join("rename_log.csv");
    assert_eq!(write_rename_log(&log, &results).unwrap(), 2);
    let rows = log_rows(&log);
    assert_eq!(rows[0][0], "qqq.pdf");
    assert_eq!(rows[0][4], "no-match");
    assert_eq!(rows[1][1], "smith2020.pdf");
    assert_eq!(rows[1][2], "smith2020");
    assert_eq!(rows[1][4], "renamed");
    assert_eq!(rows[1][5], "no");
}

#[test]
fn test_exact_mode_never_overwrites() {
    let (dir, entries) = setup(&["Smith 2020 Deep Learning Systems.pdf", "smith2020.pdf"]);
    let pdf_dir = dir.path().join("pdfs");
    fs::write(pdf_dir.join("smith2020.pdf"), b"original").unwrap();
    let config = MatchingConfig::default();

    let files = list_pdfs(&pdf_dir).unwrap();
    let matcher = Matcher::new(RenameMode::Exact, &entries, &config);
    let results = apply(matcher.plan(&files, &NoText), &pdf_dir, false);

    let scanned = results
        .iter()
        .find(|r| r.file.ends_with("Smith 2020 Deep Learning Systems.pdf"))
        .unwrap();
    assert_eq!(scanned.outcome, MatchOutcome::ExistsSkipped);
    assert_eq!(scanned.key.as_deref(), Some("smith2020"));
    assert!(pdf_dir.join("Smith 2020 Deep Learning Systems.pdf").exists());
    assert_eq!(fs::read(pdf_dir.join("smith2020.pdf")).unwrap(), b"original");
}

#[test]
fn test_dry_run_touches_nothing() {
    let (dir, entries) = setup(&["smith-2020-deep-learning.pdf"]);
    let pdf_dir = dir.path().join("pdfs");
    let config = MatchingConfig::default();

    let files = list_pdfs(&pdf_dir).unwrap();
    let matcher = Matcher::new(RenameMode::Fuzzy, &entries, &config);
    let results = apply(matcher.plan(&files, &NoText), &pdf_dir, true);

    assert_eq!(results[0].outcome, MatchOutcome::RenamePlanned);
    assert_eq!(results[0].new_name.as_deref(), Some("smith2020.pdf"));
    assert!(pdf_dir.join("smith-2020-deep-learning.pdf").exists());
    assert!(!pdf_dir.join("smith2020.pdf").exists());
}
