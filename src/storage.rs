//! Copy PDFs from the source folder into Zotero's storage layout
//! (`<storage>/<key>/<file>`), driven by an inspect report or a match log.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::zotero::sqlite::{InspectRow, RepairAction};

pub const STORAGE_LOG_HEADER: [&str; 3] = ["Key", "PDF", "Action"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageCopyRow {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "PDF")]
    pub pdf: String,
    #[serde(rename = "Action")]
    pub action: String,
}

/// A `Key,PDF` row from a link or rename log. Lowercase headers are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchLogRow {
    #[serde(rename = "Key", alias = "key", default)]
    pub key: String,
    #[serde(rename = "PDF", alias = "pdf", default)]
    pub pdf: String,
}

/// Copy one file into `<storage>/<key>/`. Never overwrites.
pub fn copy_into_storage(pdf_dir: &Path, storage: &Path, key: &str, file: &str, dry_run: bool) -> String {
    let source = pdf_dir.join(file);
    let folder = storage.join(key);
    let target = folder.join(file);

    if target.exists() {
        return "PDF already present".to_string();
    }
    if !source.exists() {
        return "Source PDF missing".to_string();
    }
    if dry_run {
        return "Would copy".to_string();
    }
    if let Err(e) = std::fs::create_dir_all(&folder) {
        warn!(folder = %folder.display(), error = %e, "cannot create storage folder");
        return format!("Copy failed: {e}");
    }
    match std::fs::copy(&source, &target) {
        Ok(_) => "PDF copied".to_string(),
        Err(e) => {
            warn!(%key, %file, error = %e, "copy failed");
            format!("Copy failed: {e}")
        }
    }
}

/// Act on the rows of an inspect report that need a copy.
pub fn from_report(rows: &[InspectRow], pdf_dir: &Path, storage: &Path, dry_run: bool) -> Vec<StorageCopyRow> {
    rows.iter()
        .map(|row| {
            let action = if row.action_needed == RepairAction::NeedsCopy {
                copy_into_storage(pdf_dir, storage, &row.item_key, &row.expected_filename, dry_run)
            } else {
                "No action needed".to_string()
            };
            StorageCopyRow {
                key: row.item_key.clone(),
                pdf: row.expected_filename.clone(),
                action,
            }
        })
        .collect()
}

/// Copy each logged PDF to its key's storage folder. Directory parts of the
/// PDF name are dropped; rows without a key or a `.pdf` name are skipped.
pub fn from_match_log(rows: &[MatchLogRow], pdf_dir: &Path, storage: &Path, dry_run: bool) -> Vec<StorageCopyRow> {
    rows.iter()
        .filter_map(|row| {
            let key = row.key.trim();
            let name = Path::new(row.pdf.trim())
                .file_name()?
                .to_string_lossy()
                .into_owned();
            if key.is_empty() || !name.to_lowercase().ends_with(".pdf") {
                return None;
            }
            let action = copy_into_storage(pdf_dir, storage, key, &name, dry_run);
            Some(StorageCopyRow {
                key: key.to_string(),
                pdf: name,
                action,
            })
        })
        .collect()
}
