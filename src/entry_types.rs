//! BibTeX entry-type standardisation.
//!
//! Rewrites entry headers textually so the rest of the file (formatting,
//! field order, comments) is left exactly as exported.

use std::path::Path;

use crate::bibliography::split_entries;
use crate::error::{Result, SyncError};
use crate::safety::write_atomic;

/// Entry types downstream tools accept.
pub const STANDARD_TYPES: [&str; 14] = [
    "article",
    "book",
    "inbook",
    "incollection",
    "inproceedings",
    "conference",
    "manual",
    "mastersthesis",
    "phdthesis",
    "misc",
    "proceedings",
    "techreport",
    "unpublished",
    "presentation",
];

pub fn remap_type(entry_type: &str) -> Option<&'static str> {
    match entry_type.to_lowercase().as_str() {
        "report" => Some("techreport"),
        "thesis" => Some("phdthesis"),
        "online" | "electronic" => Some("misc"),
        _ => None,
    }
}

pub fn is_standard(entry_type: &str) -> bool {
    STANDARD_TYPES.contains(&entry_type.to_lowercase().as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeChange {
    pub key: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeReport {
    pub changes: Vec<TypeChange>,
    /// (key, type) pairs still outside [`STANDARD_TYPES`].
    pub nonstandard: Vec<(String, String)>,
}

impl TypeReport {
    /// 2 when non-standard types remain, 1 when changes were applied, else 0.
    pub fn exit_code(&self) -> u8 {
        if !self.nonstandard.is_empty() {
            2
        } else if !self.changes.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Every record whose type is not standard.
pub fn find_nonstandard(content: &str) -> Vec<(String, String)> {
    split_entries(content)
        .into_iter()
        .filter(|r| !r.is_special() && !is_standard(&r.entry_type))
        .map(|r| (r.key.to_string(), r.entry_type))
        .collect()
}

/// Rewrite remappable headers and report what changed and what is left.
/// Only the type name of each top-level entry header is touched.
pub fn standardise(content: &str) -> (String, TypeReport) {
    let mut changes = Vec::new();
    let mut rewritten = String::with_capacity(content.len());
    let mut copied = 0;
    for raw in split_entries(content) {
        let Some(to) = remap_type(&raw.entry_type) else {
            continue;
        };
        rewritten.push_str(&content[copied..raw.type_range.start]);
        rewritten.push_str(to);
        copied = raw.type_range.end;
        changes.push(TypeChange {
            key: raw.key.to_string(),
            from: raw.entry_type,
            to: to.to_string(),
        });
    }
    rewritten.push_str(&content[copied..]);
    let nonstandard = find_nonstandard(&rewritten);
    (rewritten, TypeReport { changes, nonstandard })
}

/// Standardise a file in place. With `dry_run` the file is left untouched.
pub fn standardise_file(path: &Path, dry_run: bool) -> Result<TypeReport> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let (rewritten, report) = standardise(&content);
    if !dry_run && !report.changes.is_empty() {
        write_atomic(path, rewritten.as_bytes())?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIB: &str = "@Report{r1,\n title={A}}\n\n@thesis{t1, title={B}}\n@ONLINE(o1, title={C})\n@article{a1, title={@report inside}}\n@comment{x}\n";

    #[test]
    fn test_standardise_rewrites_headers_only() {
        let (out, report) = standardise(BIB);
        assert!(out.contains("@techreport{r1,"));
        assert!(out.contains("@phdthesis{t1,"));
        assert!(out.contains("@misc(o1,"));
        assert!(out.contains("title={@report inside}"));
        assert!(out.contains("@comment{x}"));
        assert_eq!(report.changes.len(), 3);
        assert_eq!(
            report.changes[0],
            TypeChange {
                key: "r1".into(),
                from: "report".into(),
                to: "techreport".into()
            }
        );
        assert!(report.nonstandard.is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_header_lines_inside_fields_are_kept() {
        let bib = "@article{a1,\n  note = {Previously circulated as\n@report{a1draft, title={Draft}}\n},\n}\n@online{o2, title={Web}}\n";
        let (out, report) = standardise(bib);
        assert!(out.contains("\n@report{a1draft, title={Draft}}\n"));
        assert!(out.contains("@misc{o2,"));
        let keys: Vec<_> = report.changes.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["o2"]);
        assert!(report.nonstandard.is_empty());
    }

    #[test]
    fn test_second_run_is_noop() {
        let (once, _) = standardise(BIB);
        let (twice, report) = standardise(&once);
        assert_eq!(once, twice);
        assert!(report.changes.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_unfixable_types_exit_two() {
        let (_, report) = standardise("@report{r, title={x}}\n@dataset{d, title={y}}\n");
        assert_eq!(report.nonstandard, vec![("d".to_string(), "dataset".to_string())]);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_find_nonstandard_without_rewrite() {
        let found = find_nonstandard(BIB);
        let types: Vec<_> = found.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(types, vec!["report", "thesis", "online"]);
    }

    #[test]
    fn test_standardise_file_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.bib");
        std::fs::write(&path, BIB).unwrap();

        let report = standardise_file(&path, true).unwrap();
        assert_eq!(report.changes.len(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), BIB);

        standardise_file(&path, false).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("@techreport{r1,"));
    }
}
