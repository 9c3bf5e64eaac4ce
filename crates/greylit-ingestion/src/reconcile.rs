//! Offline merge of normalized tabular exports.
//!
//! Runs after normalization, over rows from any number of sources and runs.
//! Rows collapse on the strongest identifier they expose:
//!   DOI → PMID → accession number → `title|year|first_author`
//!
//! When two rows collapse, the one with better content wins (abstract +2,
//! DOI +1). Provenance is never lost: the survivor's `query_id` is the union
//! of both rows' pipe-delimited tokens. Output keeps first-occurrence order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::{normalize_doi, normalize_whitespace, IdentifierKey};
use crate::models::StudyRow;

pub const PROVENANCE_SEPARATOR: char = '|';

/// What to do when two colliding rows have the same quality score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TieBreak {
    /// The row seen first keeps its content.
    #[default]
    KeepFirst,
    /// The incoming row replaces the existing one when it is labeled
    /// `preferred` and the existing row is labeled only `over`.
    ///
    /// Asymmetric and order-dependent on purpose: it reproduces the rule that
    /// a later, more specific query's metadata (e.g. "B") supersedes an
    /// earlier broad query's ("A") on equal quality.
    PreferLabel { preferred: String, over: String },
}

impl TieBreak {
    pub fn prefer(preferred: &str, over: &str) -> Self {
        TieBreak::PreferLabel { preferred: preferred.to_string(), over: over.to_string() }
    }

    fn incoming_wins(&self, existing: &StudyRow, incoming: &StudyRow) -> bool {
        match self {
            TieBreak::KeepFirst => false,
            TieBreak::PreferLabel { preferred, over } => {
                provenance_tokens(&incoming.query_id).any(|t| t == preferred.as_str())
                    && provenance_tokens(&existing.query_id).eq(std::iter::once(over.as_str()))
            }
        }
    }
}

/// Title normalized for the composite key: lowercase with whitespace runs
/// collapsed. Punctuation is kept, so "Review." and "Review" differ.
pub fn normalize_title_key(title: &str) -> String {
    normalize_whitespace(title)
}

/// First author from a `;`-separated author list, normalized.
pub fn first_author(authors: &str) -> String {
    authors
        .split(';')
        .next()
        .map(normalize_whitespace)
        .unwrap_or_default()
}

/// Identifier key for a tabular row.
pub fn row_key(row: &StudyRow) -> IdentifierKey {
    let doi = normalize_doi(&row.doi);
    if !doi.is_empty() {
        return IdentifierKey::Doi(doi);
    }
    let pmid = normalize_whitespace(&row.pmid);
    if !pmid.is_empty() {
        return IdentifierKey::Pmid(pmid);
    }
    let accession = normalize_whitespace(&row.accession_number);
    if !accession.is_empty() {
        return IdentifierKey::AccessionNumber(accession);
    }
    IdentifierKey::TitleYearAuthor(format!(
        "{}|{}|{}",
        normalize_title_key(&row.title),
        normalize_whitespace(&row.year),
        first_author(&row.authors),
    ))
}

/// Content quality used to pick a representative: abstract +2, DOI +1.
pub fn quality_score(row: &StudyRow) -> u8 {
    let mut score = 0;
    if !row.abstract_text.trim().is_empty() {
        score += 2;
    }
    if !row.doi.trim().is_empty() {
        score += 1;
    }
    score
}

fn provenance_tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split(PROVENANCE_SEPARATOR).map(str::trim).filter(|t| !t.is_empty())
}

/// Ordered union of two pipe-delimited provenance fields.
pub fn merge_provenance(existing: &str, incoming: &str) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    for token in provenance_tokens(existing).chain(provenance_tokens(incoming)) {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens.join(&PROVENANCE_SEPARATOR.to_string())
}

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub rows_in: usize,
    pub rows_out: usize,
    /// Collisions where the incoming row's content replaced the kept row's.
    pub replaced: usize,
}

/// Reconcile rows from multiple sources into one row per identifier key.
pub fn merge(rows: Vec<StudyRow>, tie_break: &TieBreak) -> (Vec<StudyRow>, MergeStats) {
    let mut stats = MergeStats { rows_in: rows.len(), ..Default::default() };
    let mut index: HashMap<IdentifierKey, usize> = HashMap::new();
    let mut merged: Vec<StudyRow> = Vec::new();

    for mut row in rows {
        let key = row_key(&row);
        let found = index.get(&key).copied();
        let Some(slot) = found else {
            index.insert(key, merged.len());
            merged.push(row);
            continue;
        };

        let existing = &mut merged[slot];
        let (q_in, q_old) = (quality_score(&row), quality_score(existing));
        let incoming_wins = q_in > q_old || (q_in == q_old && tie_break.incoming_wins(existing, &row));
        let provenance = merge_provenance(&existing.query_id, &row.query_id);

        if incoming_wins {
            debug!(%key, "incoming row replaces kept representative");
            row.query_id = provenance;
            *existing = row;
            stats.replaced += 1;
        } else {
            existing.query_id = provenance;
        }
    }

    stats.rows_out = merged.len();
    (merged, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(title: &str, query_id: &str) -> StudyRow {
        StudyRow {
            title: title.to_string(),
            year: "2020".to_string(),
            authors: "Smith J; Doe A".to_string(),
            query_id: query_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_priority() {
        let mut r = row("T", "A");
        r.accession_number = "WOS:0001".into();
        assert_eq!(row_key(&r), IdentifierKey::AccessionNumber("wos:0001".into()));
        r.pmid = " 123 ".into();
        assert_eq!(row_key(&r), IdentifierKey::Pmid("123".into()));
        r.doi = "10.1/ABC".into();
        assert_eq!(row_key(&r), IdentifierKey::Doi("10.1/abc".into()));
    }

    #[test]
    fn test_composite_key_normalizes() {
        let a = row("Quality of Life:  a Review.", "A");
        let mut b = row(" quality of life: A\treview. ", "B");
        b.authors = "  SMITH   J ; Other".into();
        assert_eq!(row_key(&a), row_key(&b));
        assert_eq!(
            row_key(&a),
            IdentifierKey::TitleYearAuthor("quality of life: a review.|2020|smith j".into())
        );
    }

    #[test]
    fn test_composite_key_keeps_punctuation() {
        let a = row("Quality of life: a review", "A");
        let b = row("Quality of life a review", "B");
        assert_ne!(row_key(&a), row_key(&b));
        assert_eq!(first_author("Smith J | Doe A"), "smith j | doe a");
    }

    #[test]
    fn test_provenance_union_both_tokens_once() {
        let mut a = row("T", "A");
        a.doi = "10.1/x".into();
        let mut b = row("T", "B");
        b.doi = "10.1/X".into();
        let (out, stats) = merge(vec![a, b], &TieBreak::KeepFirst);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].query_id, "A|B");
        assert_eq!(stats, MergeStats { rows_in: 2, rows_out: 1, replaced: 0 });
    }

    #[test]
    fn test_abstract_row_wins_even_when_second() {
        let mut a = row("T", "A");
        a.pmid = "42".into();
        a.journal = "From A".into();
        let mut b = row("T", "B");
        b.pmid = "42".into();
        b.abstract_text = "Background: ...".into();
        b.journal = "From B".into();

        let (out, _) = merge(vec![a, b], &TieBreak::KeepFirst);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].journal, "From B");
        assert_eq!(out[0].abstract_text, "Background: ...");
        let tokens: Vec<&str> = out[0].query_id.split('|').collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&"A") && tokens.contains(&"B"));
    }

    #[test]
    fn test_lower_quality_incoming_keeps_existing_content() {
        let mut a = row("T", "A");
        a.pmid = "1".into();
        a.abstract_text = "abs".into();
        let mut b = row("T", "B");
        b.pmid = "1".into();
        b.journal = "lost".into();
        let (out, _) = merge(vec![a, b], &TieBreak::KeepFirst);
        assert_eq!(out[0].abstract_text, "abs");
        assert_eq!(out[0].journal, "");
        assert_eq!(out[0].query_id, "A|B");
    }

    #[test]
    fn test_tie_keep_first() {
        let mut a = row("T", "A");
        a.pmid = "1".into();
        a.journal = "first".into();
        let mut b = row("T", "B");
        b.pmid = "1".into();
        b.journal = "second".into();
        let (out, _) = merge(vec![a, b], &TieBreak::KeepFirst);
        assert_eq!(out[0].journal, "first");
    }

    #[test]
    fn test_tie_prefers_labeled_query() {
        let mut a = row("T", "A");
        a.pmid = "1".into();
        a.journal = "from A".into();
        let mut b = row("T", "B");
        b.pmid = "1".into();
        b.journal = "from B".into();

        let (out, stats) = merge(vec![a.clone(), b.clone()], &TieBreak::prefer("B", "A"));
        assert_eq!(out[0].journal, "from B");
        assert_eq!(out[0].query_id, "A|B");
        assert_eq!(stats.replaced, 1);

        // Asymmetric: an "A" row arriving after "B" does not take over.
        let (out, _) = merge(vec![b, a], &TieBreak::prefer("B", "A"));
        assert_eq!(out[0].journal, "from B");
        assert_eq!(out[0].query_id, "B|A");
    }

    #[test]
    fn test_insertion_order_of_first_occurrence() {
        let mut rows = Vec::new();
        for (i, q) in ["A", "B", "A", "B"].iter().enumerate() {
            let mut r = row(&format!("Title {}", i % 2), q);
            r.year = String::new();
            rows.push(r);
        }
        rows.push(row("Third", "A"));
        let (out, _) = merge(rows, &TieBreak::KeepFirst);
        let titles: Vec<&str> = out.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Title 0", "Title 1", "Third"]);
    }

    #[test]
    fn test_merge_provenance_dedupes_tokens() {
        assert_eq!(merge_provenance("A|B", "B|C"), "A|B|C");
        assert_eq!(merge_provenance("", "B"), "B");
        assert_eq!(merge_provenance("A||", " A "), "A");
    }

    #[test]
    fn test_quality_score() {
        let mut r = row("T", "A");
        assert_eq!(quality_score(&r), 0);
        r.doi = "10.1/x".into();
        assert_eq!(quality_score(&r), 1);
        r.abstract_text = "  text ".into();
        assert_eq!(quality_score(&r), 3);
    }
}
