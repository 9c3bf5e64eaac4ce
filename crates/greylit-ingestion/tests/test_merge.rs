//! Normalise RIS exports and PubMed search output, then reconcile them with a
//! pipeline CSV.

use std::fs;

use greylit_ingestion::export::{read_rows_csv, write_jsonl, write_rows_csv};
use greylit_ingestion::pipeline::{run_merge, run_normalize};
use greylit_ingestion::reconcile::TieBreak;
use greylit_ingestion::{Record, StudyRow};
use pretty_assertions::assert_eq;

const WOS_A: &str = "\
TY  - JOUR
TI  - Long-term outcomes after cardiac arrest
AU  - Smith, J
PY  - 2020
DO  - 10.1000/XYZ
ER  - 

TY  - JOUR
TI  - Only in Web of Science
AU  - Lee, K
PY  - 2019
ER  - 
";

const CINAHL_B: &str = "\
TY  - JOUR
TI  - Long-term outcomes after cardiac arrest
AU  - Smith, J
PY  - 2020
DO  - 10.1000/xyz
AB  - Survivors reported reduced quality of life.
ER  - 
";

#[test]
fn test_normalize_then_merge() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    let normalized = dir.path().join("normalized");
    fs::create_dir_all(raw.join("wos")).unwrap();
    fs::create_dir_all(raw.join("cinahl")).unwrap();
    fs::write(raw.join("wos").join("wos_querya.ris"), WOS_A).unwrap();
    fs::write(raw.join("cinahl").join("cinahl_queryb.ris"), CINAHL_B).unwrap();

    let written =
        run_normalize(&raw, &normalized, &["cinahl".to_string(), "wos".to_string()], None).unwrap();
    assert_eq!(written.len(), 2);

    // A pipeline CSV without source_file, sharing nothing with the exports.
    let grey = StudyRow {
        source_database: "openalex".into(),
        title: "Survivorship toolkit".into(),
        query_id: "A".into(),
        ..Default::default()
    };
    write_rows_csv(&normalized.join("grey").join("grey_candidates.csv"), &[grey]).unwrap();

    let output = normalized.join("merged_deduped.csv");
    let stats = run_merge(&normalized, &output, &TieBreak::KeepFirst).unwrap();
    assert_eq!(stats.rows_in, 4);
    assert_eq!(stats.rows_out, 3);

    let rows = read_rows_csv(&output).unwrap();
    let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
    // Sorted file order: cinahl/, grey/, wos/.
    assert_eq!(
        titles,
        vec!["Long-term outcomes after cardiac arrest", "Survivorship toolkit", "Only in Web of Science"]
    );

    let shared = &rows[0];
    assert_eq!(shared.source_database, "cinahl");
    assert_eq!(shared.abstract_text, "Survivors reported reduced quality of life.");
    assert_eq!(shared.query_id, "B|A");

    assert_eq!(rows[1].source_file, "grey_candidates.csv");

    // Re-running ignores the previous output inside the input directory.
    let again = run_merge(&normalized, &output, &TieBreak::KeepFirst).unwrap();
    assert_eq!(again.rows_in, 4);
}

fn pubmed_record(title: &str, pmid: &str, doi: Option<&str>, query_id: &str) -> Record {
    let mut r = Record::with_title(title);
    r.pmid = Some(pmid.into());
    r.doi = doi.map(String::from);
    r.year = Some(2020);
    r.authors = vec!["Smith J".into()];
    r.source = Some("pubmed".into());
    r.query_id = Some(query_id.into());
    r
}

#[test]
fn test_pubmed_rows_join_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    let search_raw = dir.path().join("outputs").join("raw");
    let normalized = dir.path().join("normalized");
    fs::create_dir_all(raw.join("wos")).unwrap();
    fs::write(raw.join("wos").join("wos_querya.ris"), WOS_A).unwrap();

    // Same DOI as the WoS export, plus a PubMed-only record.
    write_jsonl(
        &search_raw.join("pubmed_B.jsonl"),
        &[
            pubmed_record("Long-term outcomes after cardiac arrest", "3001", Some("10.1000/xyz"), "B"),
            pubmed_record("Only in PubMed", "3002", None, "B"),
        ],
    )
    .unwrap();
    write_jsonl(&search_raw.join("openalex_B.jsonl"), &[Record::with_title("Not PubMed")]).unwrap();

    let written = run_normalize(&raw, &normalized, &["wos".to_string()], Some(search_raw.as_path())).unwrap();
    assert_eq!(written.len(), 2);
    assert!(written.contains(&normalized.join("pubmed.csv")));

    let pubmed = read_rows_csv(&normalized.join("pubmed.csv")).unwrap();
    assert_eq!(pubmed.len(), 2);
    assert!(pubmed.iter().all(|r| r.source_database == "pubmed" && r.query_id == "B"));
    assert_eq!(pubmed[0].source_file, "pubmed_B.jsonl");

    let output = normalized.join("merged_deduped.csv");
    let stats = run_merge(&normalized, &output, &TieBreak::KeepFirst).unwrap();
    assert_eq!(stats.rows_in, 4);
    assert_eq!(stats.rows_out, 3);

    let rows = read_rows_csv(&output).unwrap();
    // pubmed.csv sorts before wos/, so the PubMed row is kept first.
    assert_eq!(rows[0].pmid, "3001");
    assert_eq!(rows[0].query_id, "B|A");
    assert!(rows.iter().any(|r| r.title == "Only in PubMed"));
}

#[test]
fn test_merge_skips_previous_output_spelled_differently() {
    let dir = tempfile::tempdir().unwrap();
    let normalized = dir.path().join("normalized");
    let row = StudyRow { title: "Survivorship toolkit".into(), query_id: "A".into(), ..Default::default() };
    write_rows_csv(&normalized.join("grey").join("grey.csv"), &[row]).unwrap();

    let output = normalized.join("merged_deduped.csv");
    run_merge(&normalized, &output, &TieBreak::KeepFirst).unwrap();

    // Same file reached through a `..` component in the input directory.
    let dotted_input = normalized.join("..").join("normalized");
    let again = run_merge(&dotted_input, &output, &TieBreak::KeepFirst).unwrap();
    assert_eq!(again.rows_in, 1);
    let swapped = run_merge(&normalized, &dotted_input.join("merged_deduped.csv"), &TieBreak::KeepFirst).unwrap();
    assert_eq!(swapped.rows_in, 1);
}
