//! PubMed records from a search run → rows.
//!
//! Reads the raw `pubmed_<query>.jsonl` files a search run writes and
//! flattens them into one `pubmed.csv` so PubMed takes part in the merge.
//! The QC flags stay in the raw JSONL; the tabular row has no column for them.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use greylit_common::Result;

use crate::export::{files_with_extension, read_jsonl, write_rows_csv};
use crate::models::StudyRow;

pub const PUBMED_CSV: &str = "pubmed.csv";
const RAW_PREFIX: &str = "pubmed_";

/// Rows from every `pubmed_*.jsonl` directly under `raw_dir`, in file order.
pub fn pubmed_rows(raw_dir: &Path) -> Result<Vec<StudyRow>> {
    let mut rows = Vec::new();
    for path in files_with_extension(raw_dir, "jsonl", Some(1))? {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !file_name.starts_with(RAW_PREFIX) {
            continue;
        }
        for record in read_jsonl(&path)? {
            rows.push(StudyRow {
                source_database: "pubmed".to_string(),
                source_file: file_name.clone(),
                record_type: String::new(),
                accession_number: String::new(),
                ..record.to_study_row()
            });
        }
    }
    Ok(rows)
}

/// Write `<out_dir>/pubmed.csv` from the raw PubMed JSONL under `raw_dir`.
///
/// Returns `None` when `raw_dir` does not exist; otherwise the CSV is written
/// even if no PubMed records were found.
pub fn normalize_pubmed_jsonl(raw_dir: &Path, out_dir: &Path) -> Result<Option<PathBuf>> {
    if !raw_dir.is_dir() {
        warn!(dir = %raw_dir.display(), "no raw search output for PubMed");
        return Ok(None);
    }
    let rows = pubmed_rows(raw_dir)?;
    let output = out_dir.join(PUBMED_CSV);
    write_rows_csv(&output, &rows)?;
    info!(output = %output.display(), rows = rows.len(), "Normalised PubMed records");
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{read_rows_csv, write_jsonl};
    use crate::models::Record;
    use pretty_assertions::assert_eq;

    fn pubmed_record(pmid: &str, query_id: &str) -> Record {
        let mut r = Record::with_title("Health-related quality of life after cardiac arrest");
        r.pmid = Some(pmid.into());
        r.doi = Some("10.1/hrqol".into());
        r.year = Some(2021);
        r.authors = vec!["Smith J".into(), "Doe A".into()];
        r.journal = Some("Resuscitation".into());
        r.source = Some("pubmed".into());
        r.query_id = Some(query_id.into());
        r.set_extra("flag_hrqol_language", serde_json::Value::Bool(true));
        r
    }

    #[test]
    fn test_rows_keep_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(&dir.path().join("pubmed_A.jsonl"), &[pubmed_record("111", "A")]).unwrap();
        write_jsonl(&dir.path().join("openalex_A.jsonl"), &[Record::with_title("skip me")]).unwrap();

        let rows = pubmed_rows(dir.path()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.source_database, "pubmed");
        assert_eq!(row.source_file, "pubmed_A.jsonl");
        assert_eq!(row.pmid, "111");
        assert_eq!(row.doi, "10.1/hrqol");
        assert_eq!(row.year, "2021");
        assert_eq!(row.authors, "Smith J; Doe A");
        assert_eq!(row.journal, "Resuscitation");
        assert_eq!(row.query_id, "A");
        assert_eq!(row.record_type, "");
    }

    #[test]
    fn test_writes_header_only_csv_without_records() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        let out = normalize_pubmed_jsonl(&raw, &dir.path().join("normalized")).unwrap().unwrap();
        assert!(read_rows_csv(&out).unwrap().is_empty());
    }

    #[test]
    fn test_missing_raw_dir_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = normalize_pubmed_jsonl(&dir.path().join("absent"), dir.path()).unwrap();
        assert_eq!(out, None);
        assert!(!dir.path().join(PUBMED_CSV).exists());
    }
}
