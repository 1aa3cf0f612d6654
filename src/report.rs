//! CSV decision logs and end-of-run summaries.
//!
//! Every batch job writes one row per decision. Dry runs still write the log;
//! only side effects are skipped.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::models::{MatchResult, RenameLogRow};
use crate::safety::ensure_parent;

pub const RENAME_LOG_HEADER: [&str; 6] = ["Original", "New", "CitationKey", "Score", "Result", "OCR"];

/// A CSV log with a fixed header, written row by row.
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CsvLog {
    pub fn create(path: &Path, header: &[&str]) -> Result<Self> {
        ensure_parent(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(header)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn write_row<I, S>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.writer.write_record(fields)?;
        self.rows += 1;
        Ok(())
    }

    /// Write a struct row; its field order must follow the header.
    pub fn serialize<T: Serialize>(&mut self, row: &T) -> Result<()> {
        self.writer.serialize(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of data rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .map_err(|e| SyncError::io(&self.path, e))?;
        Ok(self.rows)
    }
}

/// Read a CSV file with a header into typed rows.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write the rename decisions in the order given.
pub fn write_rename_log(path: &Path, results: &[MatchResult]) -> Result<usize> {
    let mut log = CsvLog::create(path, &RENAME_LOG_HEADER)?;
    for r in results {
        let original = file_name(&r.file);
        log.serialize(&RenameLogRow {
            original: &original,
            new: r.new_name.as_deref().unwrap_or(""),
            citation_key: r.key.as_deref().unwrap_or(""),
            score: format!("{:.2}", r.score),
            result: r.outcome.as_str(),
            ocr: if r.ocr { "yes" } else { "no" },
        })?;
    }
    log.finish()
}

/// Counts per outcome label, printed at the end of a run.
#[derive(Debug, Default)]
pub struct Summary {
    counts: BTreeMap<String, usize>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: impl Into<String>) {
        *self.counts.entry(label.into()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn print(&self, title: &str, log_path: Option<&Path>) {
        println!("\n{:=<60}", "");
        println!("{}", title);
        for (label, count) in &self.counts {
            println!("  {}: {}", label, count);
        }
        println!("  Total: {}", self.total());
        if let Some(path) = log_path {
            println!("  Log: {}", path.display());
        }
        println!("{:=<60}", "");
    }
}
