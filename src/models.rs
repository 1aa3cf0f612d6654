//! Core data models shared by the matching and linking jobs.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::normalize::NO_DATE;

// ============================================================================
// Bibliography Models
// ============================================================================

/// One BibTeX entry reduced to what the matchers need.
#[derive(Clone, Debug, PartialEq)]
pub struct BibEntry {
    pub key: String,
    pub entry_type: String,
    /// Raw title, braces removed.
    pub title: String,
    /// Raw surname of the first author.
    pub first_author: String,
    /// Every author as "Family, Given".
    pub authors: Vec<String>,
    pub year: Option<String>,
}

impl BibEntry {
    pub fn year_display(&self) -> &str {
        self.year.as_deref().unwrap_or(NO_DATE)
    }
}

/// Precomputed comparison keys for one bibliography entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub key: String,
    /// Normalized first-author surname; may be empty.
    pub author: String,
    pub year: Option<String>,
    /// Normalized first N title words before any subtitle.
    pub title_prefix: String,
}

// ============================================================================
// CSL-JSON Models
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CslName {
    pub family: Option<String>,
    pub given: Option<String>,
    pub literal: Option<String>,
}

impl CslName {
    /// "Family, Given", falling back to whichever part exists.
    pub fn display(&self) -> String {
        match (&self.family, &self.given, &self.literal) {
            (Some(f), Some(g), _) if !g.is_empty() => format!("{f}, {g}"),
            (Some(f), _, _) => f.clone(),
            (None, Some(g), _) => g.clone(),
            (None, None, Some(l)) => l.clone(),
            _ => String::new(),
        }
    }

    /// "Given Family" for free-text searches.
    pub fn full_name(&self) -> String {
        match (&self.given, &self.family) {
            (Some(g), Some(f)) => format!("{g} {f}"),
            (None, Some(f)) => f.clone(),
            (Some(g), None) => g.clone(),
            (None, None) => self.literal.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CslDate {
    /// Date parts may be numbers or strings depending on the exporter.
    #[serde(rename = "date-parts")]
    pub date_parts: Vec<Vec<serde_json::Value>>,
}

/// One CSL-JSON record as exported by Better BibTeX.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CslItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: Option<String>,
    pub author: Vec<CslName>,
    pub issued: Option<CslDate>,
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    pub note: Option<String>,
}

impl CslItem {
    pub fn year(&self) -> Option<String> {
        let first = self.issued.as_ref()?.date_parts.first()?.first()?;
        match first {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn year_display(&self) -> String {
        self.year().unwrap_or_else(|| NO_DATE.to_string())
    }

    pub fn title_or_key(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Authors joined as "Family, Given; Family, Given".
    pub fn authors_display(&self) -> String {
        self.author
            .iter()
            .map(CslName::display)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Match Results
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Renamed,
    /// Dry run: a rename would have happened.
    RenamePlanned,
    ExistsSkipped,
    NoMatch,
    /// No usable text even after OCR.
    Unreadable,
    Failed,
}

impl MatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchOutcome::Renamed => "renamed",
            MatchOutcome::RenamePlanned => "dry-run",
            MatchOutcome::ExistsSkipped => "exists-skipped",
            MatchOutcome::NoMatch => "no-match",
            MatchOutcome::Unreadable => "failed to read",
            MatchOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one candidate PDF.
#[derive(Clone, Debug)]
pub struct MatchResult {
    pub file: PathBuf,
    pub key: Option<String>,
    pub new_name: Option<String>,
    pub score: f64,
    pub outcome: MatchOutcome,
    pub ocr: bool,
}

/// Row written to the rename log.
#[derive(Debug, Serialize)]
pub struct RenameLogRow<'a> {
    #[serde(rename = "Original")]
    pub original: &'a str,
    #[serde(rename = "New")]
    pub new: &'a str,
    #[serde(rename = "CitationKey")]
    pub citation_key: &'a str,
    #[serde(rename = "Score")]
    pub score: String,
    #[serde(rename = "Result")]
    pub result: &'a str,
    #[serde(rename = "OCR")]
    pub ocr: &'a str,
}

// ============================================================================
// Link Records
// ============================================================================

/// Cross-system links for one citation key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(rename = "CitationKey")]
    pub citation_key: String,
    #[serde(rename = "Note_Link", default)]
    pub note_link: String,
    #[serde(rename = "DEVONthink_Link", default)]
    pub devonthink_link: String,
}

impl LinkRecord {
    pub fn is_complete(&self) -> bool {
        !self.note_link.is_empty() && !self.devonthink_link.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csl_item_parses_mixed_date_parts() {
        let item: CslItem = serde_json::from_str(
            r#"{"id":"doe2019","type":"book","title":"T",
                "author":[{"family":"Doe","given":"Jane"},{"literal":"ACME"}],
                "issued":{"date-parts":[["2019", 3]]},"DOI":"10.1/x"}"#,
        )
        .unwrap();
        assert_eq!(item.year().as_deref(), Some("2019"));
        assert_eq!(item.authors_display(), "Doe, Jane; ACME");
        assert_eq!(item.doi.as_deref(), Some("10.1/x"));
    }

    #[test]
    fn test_csl_item_without_date() {
        let item: CslItem = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(item.year_display(), "n.d.");
        assert_eq!(item.title_or_key(), "x");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(MatchOutcome::Unreadable.to_string(), "failed to read");
        assert_eq!(MatchOutcome::RenamePlanned.as_str(), "dry-run");
    }

    #[test]
    fn test_link_record_complete() {
        let mut r = LinkRecord {
            citation_key: "k".into(),
            note_link: "obsidian://x".into(),
            ..Default::default()
        };
        assert!(!r.is_complete());
        r.devonthink_link = "x-devonthink-item://1".into();
        assert!(r.is_complete());
    }
}
