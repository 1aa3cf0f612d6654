//! Bibliography loading and the candidate index.
//!
//! BibTeX is parsed with `biblatex`. When the whole file fails to parse
//! (a malformed entry, a duplicated key) each entry is parsed on its own so
//! one bad record cannot hide the rest of the library.

use std::ops::Range;
use std::path::Path;

use biblatex::{Bibliography, Chunk, Entry, Spanned};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::{BibEntry, Candidate, CslItem};
use crate::normalize::{
    extract_year, first_author_surname, normalize, normalize_spaced, title_prefix,
};

// ============================================================================
// Raw Entry Scanning
// ============================================================================

/// Start of an entry: `@type{key,` or `@type(key,`.
pub static ENTRY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*@([A-Za-z]+)[ \t]*[{(][ \t]*([^,\s]*)").unwrap());

/// Entry kinds that are not bibliography records.
pub const SPECIAL_ENTRY_TYPES: [&str; 3] = ["comment", "string", "preamble"];

/// One entry as it appears in the file, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry<'a> {
    pub entry_type: String,
    /// Byte range of the type name in the source.
    pub type_range: Range<usize>,
    pub key: &'a str,
    pub text: &'a str,
}

impl RawEntry<'_> {
    pub fn is_special(&self) -> bool {
        SPECIAL_ENTRY_TYPES.contains(&self.entry_type.as_str())
    }
}

/// Offset just past the delimiter closing the entry opened at `open`.
/// `None` when `open` is not `{`/`(` or the entry never closes.
fn entry_end(content: &str, open: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let closer = match bytes.get(open)? {
        b'{' => b'}',
        b'(' => b')',
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        match b {
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            c if c == closer && depth == 0 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Split BibTeX source into entries. Text between headers belongs to the
/// previous entry. Header-like lines inside an open entry are field text;
/// an entry that never closes does not hide the headers after it.
pub fn split_entries(content: &str) -> Vec<RawEntry<'_>> {
    let mut headers = Vec::new();
    let mut resume = 0;
    for caps in ENTRY_HEADER.captures_iter(content) {
        let (Some(whole), Some(ty), Some(key)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() < resume {
            continue;
        }
        resume = content[ty.end()..]
            .find(['{', '('])
            .and_then(|i| entry_end(content, ty.end() + i))
            .unwrap_or(whole.end());
        headers.push((whole.start(), ty.range(), key.as_str()));
    }

    let mut entries = Vec::with_capacity(headers.len());
    for (i, (start, type_range, key)) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map_or(content.len(), |next| next.0);
        entries.push(RawEntry {
            entry_type: content[type_range.clone()].to_lowercase(),
            type_range: type_range.clone(),
            key: *key,
            text: &content[*start..end],
        });
    }
    entries
}

// ============================================================================
// BibTeX Loading
// ============================================================================

fn chunks_to_string(chunks: &[Spanned<Chunk>]) -> String {
    chunks
        .iter()
        .map(|spanned| match &spanned.v {
            Chunk::Normal(s) => s.as_str(),
            Chunk::Verbatim(s) => s.as_str(),
            Chunk::Math(s) => s.as_str(),
        })
        .collect::<String>()
}

fn field(entry: &Entry, name: &str) -> Option<String> {
    entry
        .fields
        .get(name)
        .map(|chunks| chunks_to_string(chunks))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn to_bib_entry(entry: &Entry, types: &FxHashMap<&str, &str>) -> BibEntry {
    let title = field(entry, "title").unwrap_or_default();
    let year = extract_year(field(entry, "year").as_deref(), field(entry, "date").as_deref());

    let (first_author, authors) = match entry.author() {
        Ok(people) if !people.is_empty() => {
            let names: Vec<String> = people
                .iter()
                .map(|p| {
                    let family = if p.prefix.is_empty() {
                        p.name.clone()
                    } else {
                        format!("{} {}", p.prefix, p.name)
                    };
                    if p.given_name.is_empty() {
                        family
                    } else {
                        format!("{}, {}", family, p.given_name)
                    }
                })
                .collect();
            let first = names[0].split(',').next().unwrap_or("").trim().to_string();
            (first, names)
        }
        _ => {
            // Institutional or unparsable author fields keep the raw text
            let raw = field(entry, "author").unwrap_or_default();
            let authors = raw.split(" and ").map(|a| a.trim().to_string()).collect();
            (first_author_surname(&raw), authors)
        }
    };

    BibEntry {
        key: entry.key.clone(),
        entry_type: types
            .get(entry.key.as_str())
            .map_or_else(|| "misc".to_string(), |t| t.to_string()),
        title,
        first_author,
        authors,
        year,
    }
}

fn parse_per_entry(raw: &[RawEntry<'_>], types: &FxHashMap<&str, &str>) -> Vec<BibEntry> {
    let prelude: String = raw
        .iter()
        .filter(|r| r.entry_type == "string")
        .map(|r| r.text)
        .collect::<Vec<_>>()
        .join("\n");

    let mut entries = Vec::new();
    for r in raw.iter().filter(|r| !r.is_special()) {
        match Bibliography::parse(&format!("{prelude}\n{}", r.text)) {
            Ok(bib) => entries.extend(bib.iter().map(|e| to_bib_entry(e, types))),
            Err(e) => warn!(key = r.key, error = %e, "skipping unparsable entry"),
        }
    }
    entries
}

/// Parse BibTeX source. `source` names the file in errors and warnings.
pub fn parse_bibtex(content: &str, source: &Path) -> Result<Vec<BibEntry>> {
    let raw = split_entries(content);
    let mut types: FxHashMap<&str, &str> = FxHashMap::default();
    for r in raw.iter().filter(|r| !r.is_special()) {
        types.entry(r.key).or_insert(r.entry_type.as_str());
    }

    let record_count = raw.iter().filter(|r| !r.is_special()).count();

    // Duplicated keys go straight to per-entry parsing so file order decides the winner
    let whole = if types.len() == record_count {
        Bibliography::parse(content).map_err(|e| e.to_string())
    } else {
        Err("duplicate citation keys".to_string())
    };

    let parsed: Vec<BibEntry> = match whole {
        Ok(bib) => bib.iter().map(|e| to_bib_entry(e, &types)).collect(),
        Err(reason) => {
            warn!(file = %source.display(), %reason, "parsing bibliography entry by entry");
            let entries = parse_per_entry(&raw, &types);
            if entries.is_empty() && record_count > 0 {
                return Err(SyncError::Bibliography(source.to_path_buf(), reason));
            }
            entries
        }
    };

    let mut seen = FxHashSet::default();
    let mut entries = Vec::with_capacity(parsed.len());
    for entry in parsed {
        if seen.insert(entry.key.clone()) {
            entries.push(entry);
        } else {
            warn!(key = %entry.key, "duplicate citation key, keeping the first entry");
        }
    }

    debug!(count = entries.len(), "loaded bibliography entries");
    Ok(entries)
}

pub fn load_bibtex(path: &Path) -> Result<Vec<BibEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    parse_bibtex(&content, path)
}

// ============================================================================
// CSL-JSON Loading
// ============================================================================

/// CSL-JSON items with case-insensitive key lookup.
#[derive(Debug, Default)]
pub struct CslLibrary {
    items: Vec<CslItem>,
    by_key: FxHashMap<String, usize>,
}

impl CslLibrary {
    pub fn from_items(items: Vec<CslItem>) -> Self {
        let mut by_key = FxHashMap::default();
        for (i, item) in items.iter().enumerate() {
            if item.id.is_empty() {
                continue;
            }
            if by_key.insert(item.id.to_lowercase(), i).is_some() {
                warn!(key = %item.id, "duplicate CSL id, keeping the last entry");
            }
        }
        Self { items, by_key }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let items: Vec<CslItem> = serde_json::from_str(&content)?;
        Ok(Self::from_items(items))
    }

    /// Case-insensitive lookup returning the item under its canonical key.
    pub fn get(&self, key: &str) -> Option<&CslItem> {
        self.by_key
            .get(&key.trim().to_lowercase())
            .map(|&i| &self.items[i])
    }

    pub fn require(&self, key: &str) -> Result<&CslItem> {
        self.get(key)
            .ok_or_else(|| SyncError::KeyNotFound(key.trim().to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CslItem> {
        self.items.iter().filter(|i| !i.id.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ============================================================================
// Candidate Index
// ============================================================================

/// Normalized (author, year, title prefix) keys for every entry, built once per run.
#[derive(Debug, Clone)]
pub struct CandidateIndex {
    candidates: Vec<Candidate>,
}

impl CandidateIndex {
    pub fn build(entries: &[BibEntry], title_words: usize) -> Self {
        let candidates = entries
            .iter()
            .map(|e| Candidate {
                key: e.key.clone(),
                author: normalize(&e.first_author),
                year: e.year.clone(),
                title_prefix: title_prefix(&e.title, title_words),
            })
            .collect();
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Entry whose author, year and title prefix all occur in the normalized subject.
    /// Several hits resolve to the smallest key.
    pub fn exact_match(&self, subject: &str) -> Option<&Candidate> {
        self.candidates
            .iter()
            .filter(|c| {
                !c.author.is_empty()
                    && !c.title_prefix.is_empty()
                    && c.year.as_deref().is_some_and(|y| subject.contains(y))
                    && subject.contains(c.author.as_str())
                    && subject.contains(c.title_prefix.as_str())
            })
            .min_by(|a, b| a.key.cmp(&b.key))
    }
}

/// Spaced-normalized full title → citation key. First entry wins on collisions.
pub fn title_index(entries: &[BibEntry]) -> FxHashMap<String, String> {
    let mut index = FxHashMap::default();
    for e in entries {
        let title = normalize_spaced(&e.title);
        if !title.is_empty() {
            index.entry(title).or_insert_with(|| e.key.clone());
        }
    }
    index
}
