//! Normalization helpers shared by every matcher.
//!
//! Comparison keys are ASCII-folded, lowercased and stripped to `[a-z0-9]`.
//! Folding happens first so "Müller" becomes "muller" rather than "mller".

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Runs of anything outside `[a-z0-9]` (applied after folding and lowercasing).
pub static NON_ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Characters that cannot appear in a file name on macOS/Windows volumes.
pub static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\:*?"<>|]"#).unwrap());

/// Four-digit year anywhere in a date string ("2020-05-01", "May 2020").
pub static YEAR_IN_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());

/// Year placeholder used in notes and logs when an entry has no date.
pub const NO_DATE: &str = "n.d.";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII by applying NFKD decomposition,
/// removing combining marks and transliterating whatever is left.
/// e.g., "Gödel" → "godel", "Łukasiewicz" → "lukasiewicz"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Comparison key: folded, lowercased, only `[a-z0-9]` kept.
pub fn normalize(text: &str) -> String {
    fold_to_ascii(text)
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Like [`normalize`] but word boundaries survive as single spaces.
/// Used for title lookups and partial-ratio matching.
pub fn normalize_spaced(text: &str) -> String {
    let folded = fold_to_ascii(text);
    NON_ALNUM_RUN.replace_all(&folded, " ").trim().to_string()
}

/// First `n` words of the title before any subtitle colon, normalized.
pub fn title_prefix(title: &str, n: usize) -> String {
    let main = title.split(':').next().unwrap_or("");
    let words: Vec<&str> = main.split_whitespace().take(n).collect();
    normalize(&words.join(" "))
}

/// Surname of the first author in a BibTeX-style `A and B and C` list.
///
/// `"Family, Given"` yields the part before the comma; `"Given Family"`
/// yields the last word. Returns the raw surname; callers normalize.
pub fn first_author_surname(authors: &str) -> String {
    let first = authors
        .split(" and ")
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(|c| c == '{' || c == '}');
    if first.is_empty() {
        return String::new();
    }
    if let Some((family, _)) = first.split_once(',') {
        return family.trim().to_string();
    }
    first
        .split_whitespace()
        .last()
        .unwrap_or("")
        .to_string()
}

/// Year from an explicit year field or the first four digits of a date field.
pub fn extract_year(year: Option<&str>, date: Option<&str>) -> Option<String> {
    let find = |s: &str| YEAR_IN_DATE.find(s).map(|m| m.as_str().to_string());
    year.and_then(find).or_else(|| date.and_then(find))
}

/// Make a citation key usable as a file stem.
pub fn safe_file_stem(key: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(key, "_").to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("Smith-2020: Deep Learning!"), "smith2020deeplearning");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn test_normalize_folds_diacritics() {
        assert_eq!(normalize("Müller"), "muller");
        assert_eq!(normalize("Gödel, Escher"), "godelescher");
        assert_eq!(fold_to_ascii("Łukasiewicz"), "lukasiewicz");
    }

    #[test]
    fn test_normalize_idempotent() {
        for s in ["Müller 2019", "  Deep   Learning  ", "Ωmega-3", "a/b\\c", "日本語"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_normalize_spaced() {
        assert_eq!(normalize_spaced("Deep  Learning: A Survey"), "deep learning a survey");
        assert_eq!(normalize_spaced("smith-2020-deep-learning"), "smith 2020 deep learning");
        assert_eq!(normalize_spaced("!!"), "");
    }

    #[test]
    fn test_title_prefix() {
        assert_eq!(title_prefix("Deep Learning Systems: A Survey", 5), "deeplearningsystems");
        assert_eq!(
            title_prefix("One two three four five six seven", 5),
            "onetwothreefourfive"
        );
        assert_eq!(title_prefix("", 5), "");
    }

    #[test]
    fn test_first_author_surname() {
        assert_eq!(first_author_surname("Smith, John and Doe, Jane"), "Smith");
        assert_eq!(first_author_surname("John Smith and Jane Doe"), "Smith");
        assert_eq!(first_author_surname("{van der Berg}, Anna"), "van der Berg");
        assert_eq!(first_author_surname(""), "");
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year(Some("2020"), None), Some("2020".to_string()));
        assert_eq!(extract_year(None, Some("2019-04-01")), Some("2019".to_string()));
        assert_eq!(extract_year(Some("n.d."), None), None);
        assert_eq!(extract_year(Some(""), Some("2018")), Some("2018".to_string()));
        assert_eq!(extract_year(None, None), None);
    }

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("smith:2020/a"), "smith_2020_a");
        assert_eq!(safe_file_stem("plain2020"), "plain2020");
    }
}
