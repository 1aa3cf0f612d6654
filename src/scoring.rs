//! Scoring functions for citation-key matching.
//!
//! A candidate scores fixed weights for "subject contains the author" and
//! "subject contains the year", plus a weighted title similarity. The
//! weights, similarity metric and acceptance threshold form a [`MatchProfile`].

use serde::{Deserialize, Serialize};

use crate::models::Candidate;

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Ratcliff/Obershelp: `2·M / (|a| + |b|)`.
    Ratio,
    /// Best [`Similarity::Ratio`] of the shorter string against aligned windows of the longer.
    PartialRatio,
    /// Normalized Levenshtein similarity.
    Levenshtein,
}

impl Similarity {
    pub fn compare(self, a: &str, b: &str) -> f64 {
        match self {
            Similarity::Ratio => ratio(a, b),
            Similarity::PartialRatio => partial_ratio(a, b),
            Similarity::Levenshtein => strsim::normalized_levenshtein(a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchProfile {
    pub author_weight: f64,
    pub year_weight: f64,
    pub title_weight: f64,
    /// Number of title words (before any subtitle) compared against the subject.
    pub title_words: usize,
    /// Accept only when the score is strictly greater than this.
    pub threshold: f64,
    pub similarity: Similarity,
}

/// Filename profile: author 0.3, year 0.3, title 0.4 × ratio, threshold 0.65.
impl Default for MatchProfile {
    fn default() -> Self {
        Self {
            author_weight: 0.3,
            year_weight: 0.3,
            title_weight: 0.4,
            title_words: 5,
            threshold: 0.65,
            similarity: Similarity::Ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub key: String,
    pub score: f64,
}

// ============================================================================
// Similarity Metrics
// ============================================================================

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, size)`.
/// Ties resolve to the earliest `i`, then the earliest `j`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    let mut cur = vec![0usize; width];

    for i in alo..ahi {
        for j in blo..bhi {
            let slot = j - blo + 1;
            if a[i] == b[j] {
                let k = prev[slot - 1] + 1;
                cur[slot] = k;
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            } else {
                cur[slot] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    (best_i, best_j, best_size)
}

/// Matching blocks in ascending order, terminated by a `(|a|, |b|, 0)` sentinel.
pub fn matching_blocks(a: &[char], b: &[char]) -> Vec<(usize, usize, usize)> {
    let mut queue = vec![(0, a.len(), 0, b.len())];
    let mut blocks = Vec::new();

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        blocks.push((i, j, k));
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }

    blocks.sort_unstable();
    blocks.push((a.len(), b.len(), 0));
    blocks
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched: usize = matching_blocks(a, b).iter().map(|&(_, _, k)| k).sum();
    2.0 * matched as f64 / total as f64
}

/// Ratcliff/Obershelp similarity in `[0, 1]`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best ratio of the shorter string against windows of the longer one,
/// each window aligned on a matching block. Empty input scores 0.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    let mut best: f64 = 0.0;
    for (i, j, _) in matching_blocks(shorter, longer) {
        let start = j.saturating_sub(i);
        let end = (start + shorter.len()).min(longer.len());
        let r = ratio_chars(shorter, &longer[start..end]);
        if r > 0.995 {
            return 1.0;
        }
        best = best.max(r);
    }
    best
}

// ============================================================================
// Scoring & Selection
// ============================================================================

/// Score one candidate against a normalized subject (file stem or page text).
/// An empty author or missing year contributes nothing.
pub fn score(candidate: &Candidate, subject: &str, profile: &MatchProfile) -> f64 {
    let mut total = 0.0;

    if !candidate.author.is_empty() && subject.contains(candidate.author.as_str()) {
        total += profile.author_weight;
    }

    if let Some(year) = &candidate.year {
        if subject.contains(year.as_str()) {
            total += profile.year_weight;
        }
    }

    total + profile.title_weight * profile.similarity.compare(&candidate.title_prefix, subject)
}

/// Highest-scoring candidate regardless of threshold.
/// Equal scores resolve to the lexicographically smallest key.
pub fn best_candidate<'a, I>(scored: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    scored.into_iter().fold(None, |best, (key, s)| match best {
        None => Some((key, s)),
        Some((best_key, best_score)) => {
            if s > best_score || (s == best_score && key < best_key) {
                Some((key, s))
            } else {
                Some((best_key, best_score))
            }
        }
    })
}

/// Score every candidate and return the winner when it clears the threshold.
///
/// The second element is the best score seen, accepted or not, for logging.
pub fn select_best(
    candidates: &[Candidate],
    subject: &str,
    profile: &MatchProfile,
) -> (Option<ScoredMatch>, f64) {
    let best = best_candidate(
        candidates
            .iter()
            .map(|c| (c.key.as_str(), score(c, subject, profile))),
    );

    match best {
        Some((key, s)) if s > profile.threshold => (
            Some(ScoredMatch {
                key: key.to_string(),
                score: s,
            }),
            s,
        ),
        Some((_, s)) => (None, s),
        None => (None, 0.0),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &str, author: &str, year: Option<&str>, title: &str) -> Candidate {
        Candidate {
            key: key.to_string(),
            author: author.to_string(),
            year: year.map(str::to_string),
            title_prefix: title.to_string(),
        }
    }

    #[test]
    fn test_ratio_known_values() {
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("abc", ""), 0.0);
        assert_eq!(ratio("abcd", "abcd"), 1.0);
        // difflib: SequenceMatcher(None, "abcd", "bcde").ratio() == 0.75
        assert!((ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert!((ratio("deeplearningsystems", "smith2020deeplearning") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_matching_blocks_sentinel() {
        let a: Vec<char> = "abxcd".chars().collect();
        let b: Vec<char> = "abcd".chars().collect();
        let blocks = matching_blocks(&a, &b);
        assert_eq!(blocks, vec![(0, 0, 2), (3, 2, 2), (5, 4, 0)]);
    }

    #[test]
    fn test_partial_ratio() {
        assert_eq!(partial_ratio("deep learning", "a survey of deep learning methods"), 1.0);
        assert_eq!(partial_ratio("", "anything"), 0.0);
        assert!(partial_ratio("quantum chromodynamics", "baking bread at home") < 0.5);
    }

    #[test]
    fn test_levenshtein_metric() {
        assert_eq!(Similarity::Levenshtein.compare("kitten", "kitten"), 1.0);
        assert!(Similarity::Levenshtein.compare("kitten", "sitting") < 0.6);
    }

    #[test]
    fn test_score_worked_example() {
        let c = candidate("smith2020", "smith", Some("2020"), "deeplearningsystems");
        let s = score(&c, "smith2020deeplearning", &MatchProfile::default());
        assert!((s - 0.84).abs() < 1e-9);
    }

    #[test]
    fn test_score_empty_author_and_missing_year_contribute_nothing() {
        let c = candidate("anon", "", None, "zzzz");
        let s = score(&c, "anything2020", &MatchProfile::default());
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_select_best_threshold_is_strict() {
        let profile = MatchProfile {
            author_weight: 0.5,
            year_weight: 0.0,
            title_weight: 0.0,
            threshold: 0.5,
            ..MatchProfile::default()
        };
        let c = vec![candidate("a", "smith", None, "")];
        let (best, top) = select_best(&c, "smith", &profile);
        assert!(best.is_none());
        assert_eq!(top, 0.5);
    }

    #[test]
    fn test_select_best_tie_breaks_on_smallest_key() {
        let c = vec![
            candidate("smith2020b", "smith", Some("2020"), "deeplearning"),
            candidate("smith2020a", "smith", Some("2020"), "deeplearning"),
        ];
        let (best, _) = select_best(&c, "smith2020deeplearning", &MatchProfile::default());
        assert_eq!(best.unwrap().key, "smith2020a");
    }

    #[test]
    fn test_select_best_no_shared_token() {
        let c = vec![candidate("smith2020", "smith", Some("2020"), "deeplearningsystems")];
        let (best, top) = select_best(&c, "xyzqv", &MatchProfile::default());
        assert!(best.is_none());
        assert!(top < 0.65);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let p: MatchProfile = toml::from_str("similarity = \"partial_ratio\"\nthreshold = 0.9").unwrap();
        assert_eq!(p.similarity, Similarity::PartialRatio);
        assert_eq!(p.title_words, 5);
    }
}
