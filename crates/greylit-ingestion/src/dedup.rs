//! Cross-source deduplication of acquired records.
//!
//! Staged check per record, first seen wins:
//!   Stage 1: strong identifier (DOI → PMID → NCT id), exact after normalization
//!   Stage 2: fuzzy title match against everything kept so far, only for
//!            records without a strong identifier
//!
//! Stage 1 is a hash lookup. Stage 2 compares against every kept title, so a
//! corpus with no identifiers at all is quadratic. Strong identifiers dominate
//! in practice; if unkeyed volume grows, a blocking index on title tokens can
//! replace the linear scan as long as first-seen-wins is kept.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use greylit_common::DedupeConfig;
use tracing::debug;

use crate::models::Record;

/// Tagged normalized identifier used to recognize the same underlying work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentifierKey {
    Doi(String),
    Pmid(String),
    Nct(String),
    AccessionNumber(String),
    /// `title|year|first_author` fallback, only used without a stronger id.
    TitleYearAuthor(String),
}

impl IdentifierKey {
    pub fn kind(&self) -> &'static str {
        match self {
            IdentifierKey::Doi(_)             => "doi",
            IdentifierKey::Pmid(_)            => "pmid",
            IdentifierKey::Nct(_)             => "nct",
            IdentifierKey::AccessionNumber(_) => "accession_number",
            IdentifierKey::TitleYearAuthor(_) => "title_year_author",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            IdentifierKey::Doi(v)
            | IdentifierKey::Pmid(v)
            | IdentifierKey::Nct(v)
            | IdentifierKey::AccessionNumber(v)
            | IdentifierKey::TitleYearAuthor(v) => v,
        }
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

/// Lowercase and collapse runs of whitespace.
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Canonical DOI: lowercase, no resolver prefix, no whitespace.
pub fn normalize_doi(doi: &str) -> String {
    let lower: String = doi.split_whitespace().collect::<String>().to_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|p| lower.strip_prefix(p))
        .unwrap_or(&lower);
    stripped.to_string()
}

fn non_empty(value: Option<&str>, normalize: impl Fn(&str) -> String) -> Option<String> {
    value.map(normalize).filter(|v| !v.is_empty())
}

/// Strong key for a record: DOI (if enabled) → PMID (if enabled) → NCT id.
pub fn strong_key(record: &Record, config: &DedupeConfig) -> Option<IdentifierKey> {
    let doi = non_empty(record.doi.as_deref(), normalize_doi).filter(|_| config.use_doi);
    let pmid = non_empty(record.pmid.as_deref(), |s| s.trim().to_string()).filter(|_| config.use_pmid);
    let nct = non_empty(record.nct_id.as_deref(), |s| s.trim().to_uppercase());

    doi.map(IdentifierKey::Doi)
        .or_else(|| pmid.map(IdentifierKey::Pmid))
        .or_else(|| nct.map(IdentifierKey::Nct))
}

/// Token-set similarity in 0..=100.
///
/// Both strings are split into token sets. If one set contains the other the
/// score is 100; otherwise the shared tokens are compared against each side's
/// shared-plus-remaining tokens and the best pairwise similarity wins.
/// Pairwise similarity is [`indel_ratio`].
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = shared.join(" ");
    let combine = |rest: &[&str]| match (sect.is_empty(), rest.is_empty()) {
        (true, _) => rest.join(" "),
        (false, true) => sect.clone(),
        (false, false) => format!("{} {}", sect, rest.join(" ")),
    };
    let combined_a = combine(&only_a);
    let combined_b = combine(&only_b);

    let mut best = indel_ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best
            .max(indel_ratio(&sect, &combined_a))
            .max(indel_ratio(&sect, &combined_b));
    }
    best
}

/// Insert/delete similarity in 0..=100: `100 * (1 - indel / (len_a + len_b))`,
/// where the indel distance is `len_a + len_b - 2 * lcs`. Lengths are in chars.
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * longest_common_subsequence(&a, &b) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb { prev[j] + 1 } else { prev[j + 1].max(cur[j]) };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Result of a deduplication check.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupResult {
    /// Record is new — keep it.
    New,
    /// Shares a strong identifier with a kept record.
    DuplicateKey(IdentifierKey),
    /// Unkeyed record whose title matches a kept record's title.
    ProbableDuplicate { similarity: f64 },
}

/// Working state of one dedup pass.
#[derive(Debug)]
pub struct Deduplicator<'a> {
    config: &'a DedupeConfig,
    seen: HashSet<IdentifierKey>,
    kept_titles: Vec<String>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(config: &'a DedupeConfig) -> Self {
        Self { config, seen: HashSet::new(), kept_titles: Vec::new() }
    }

    /// Classify `record` against what has been kept so far.
    pub fn check(&self, record: &Record) -> DedupResult {
        if let Some(key) = strong_key(record, self.config) {
            return if self.seen.contains(&key) {
                DedupResult::DuplicateKey(key)
            } else {
                DedupResult::New
            };
        }

        let title = normalize_whitespace(record.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return DedupResult::New;
        }
        let threshold = f64::from(self.config.title_fuzzy_threshold);
        self.kept_titles
            .iter()
            .filter(|kept| !kept.is_empty())
            .map(|kept| token_set_ratio(&title, kept))
            .find(|similarity| *similarity >= threshold)
            .map_or(DedupResult::New, |similarity| DedupResult::ProbableDuplicate { similarity })
    }

    /// Check and, if new, remember the record. Returns whether it was kept.
    pub fn admit(&mut self, record: &Record) -> bool {
        match self.check(record) {
            DedupResult::New => {
                if let Some(key) = strong_key(record, self.config) {
                    self.seen.insert(key);
                }
                self.kept_titles
                    .push(normalize_whitespace(record.title.as_deref().unwrap_or_default()));
                true
            }
            DedupResult::DuplicateKey(key) => {
                debug!(%key, "dropping duplicate by identifier");
                false
            }
            DedupResult::ProbableDuplicate { similarity } => {
                debug!(similarity, title = ?record.title, "dropping probable duplicate by title");
                false
            }
        }
    }
}

/// Collapse duplicates, keeping the first occurrence in input order.
pub fn dedupe(records: Vec<Record>, config: &DedupeConfig) -> Vec<Record> {
    let mut dedup = Deduplicator::new(config);
    records.into_iter().filter(|r| dedup.admit(r)).collect()
}
