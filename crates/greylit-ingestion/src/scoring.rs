//! Keyword relevance scoring.
//!
//! A record's text blob is its title plus its abstract (or search snippet),
//! lowercased. Each include term present adds 1, each exclude term present
//! subtracts 2. Terms match as case-insensitive substrings, padding included,
//! so `" arrest "` does not match inside "arrested". Blank terms are ignored.

use greylit_common::ScoringConfig;

use crate::models::Record;

/// Lowercased `title abstract` text used for term matching.
pub fn text_blob(record: &Record) -> String {
    let title = record.title.as_deref().unwrap_or_default();
    let summary = record.summary_text().unwrap_or_default();
    match (title.is_empty(), summary.is_empty()) {
        (true, true) => String::new(),
        (false, true) => title.to_lowercase(),
        (true, false) => summary.to_lowercase(),
        (false, false) => format!("{title} {summary}").to_lowercase(),
    }
}

pub fn score(record: &Record, config: &ScoringConfig) -> i32 {
    score_blob(&text_blob(record), config)
}

pub fn is_relevant(record: &Record, config: &ScoringConfig) -> bool {
    score(record, config) >= config.min_score_to_keep
}

fn score_blob(blob: &str, config: &ScoringConfig) -> i32 {
    let hits = |terms: &[String]| {
        terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter(|t| blob.contains(t.to_lowercase().as_str()))
            .count() as i32
    };
    hits(&config.include_terms) - 2 * hits(&config.exclude_terms)
}

/// Set `relevance_score` and `looks_relevant` on every record.
pub fn annotate(records: &mut [Record], config: &ScoringConfig) {
    for record in records.iter_mut() {
        let s = score(record, config);
        record.relevance_score = Some(s);
        record.looks_relevant = Some(s >= config.min_score_to_keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AbstractText;

    fn config(min: i32) -> ScoringConfig {
        ScoringConfig {
            include_terms: vec![
                "cardiac arrest".into(),
                "quality of life".into(),
                "Survivor".into(),
            ],
            exclude_terms: vec!["mice".into(), "porcine".into()],
            min_score_to_keep: min,
        }
    }

    #[test]
    fn test_include_terms_add_one_each() {
        let mut r = Record::with_title("Quality of Life in Cardiac Arrest survivors");
        r.abstract_text = Some("Follow-up at 12 months.".into());
        assert_eq!(score(&r, &config(1)), 3);
    }

    #[test]
    fn test_exclude_terms_subtract_two() {
        let r = Record::with_title("Cardiac arrest in mice");
        assert_eq!(score(&r, &config(1)), 1 - 2);
        assert!(!is_relevant(&r, &config(1)));
    }

    #[test]
    fn test_inverted_index_abstract_is_reconstituted() {
        let mut r = Record::with_title("Outcomes");
        let idx = serde_json::from_str(r#"{"quality": [0], "of": [1], "life": [2]}"#).unwrap();
        r.abstract_text = Some(AbstractText::InvertedIndex(idx));
        assert_eq!(text_blob(&r), "outcomes quality of life");
        assert_eq!(score(&r, &config(1)), 1);
    }

    #[test]
    fn test_snippet_used_without_abstract() {
        let mut r = Record::default();
        r.snippet = Some("Guidance for cardiac arrest survivors".into());
        assert_eq!(score(&r, &config(1)), 2);
    }

    #[test]
    fn test_empty_record_scores_zero() {
        let r = Record::default();
        assert_eq!(text_blob(&r), "");
        assert_eq!(score(&r, &config(1)), 0);
        assert!(!is_relevant(&r, &config(1)));
        assert!(is_relevant(&r, &config(0)));
    }

    #[test]
    fn test_blank_terms_never_match() {
        let cfg = ScoringConfig {
            include_terms: vec!["".into(), "   ".into()],
            exclude_terms: vec![],
            min_score_to_keep: 1,
        };
        assert_eq!(score(&Record::with_title("anything"), &cfg), 0);
    }

    #[test]
    fn test_padded_term_keeps_word_boundary() {
        let cfg = ScoringConfig {
            include_terms: vec![" arrest ".into()],
            exclude_terms: vec![],
            min_score_to_keep: 1,
        };
        assert_eq!(score(&Record::with_title("Cardiac arrested development"), &cfg), 0);
        assert_eq!(score(&Record::with_title("Cardiac ARREST outcomes"), &cfg), 1);
    }

    #[test]
    fn test_relevance_matches_threshold() {
        let records = [
            Record::with_title("cardiac arrest"),
            Record::with_title("porcine model"),
            Record::with_title("quality of life after cardiac arrest"),
            Record::default(),
        ];
        for min in -2..=3 {
            let cfg = config(min);
            for r in &records {
                assert_eq!(is_relevant(r, &cfg), score(r, &cfg) >= min);
                assert_eq!(score(r, &cfg), score(r, &cfg));
            }
        }
    }

    #[test]
    fn test_annotate_sets_both_fields() {
        let mut records = vec![
            Record::with_title("cardiac arrest survivor"),
            Record::with_title("unrelated"),
        ];
        annotate(&mut records, &config(1));
        assert_eq!(records[0].relevance_score, Some(2));
        assert_eq!(records[0].looks_relevant, Some(true));
        assert_eq!(records[1].relevance_score, Some(0));
        assert_eq!(records[1].looks_relevant, Some(false));
    }
}
