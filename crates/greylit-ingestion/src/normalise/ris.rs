//! RIS export parser.
//!
//! A record starts at `TY` and ends at `ER`. Lines that are not `XX  - value`
//! tags are ignored, as are tags outside a record. Repeated tags accumulate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use greylit_common::Result;

use crate::export::{files_with_extension, write_rows_csv};
use crate::models::StudyRow;

type RisFields = HashMap<String, Vec<String>>;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9]{2})\s*-\s*(.*)$").unwrap())
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19|20)\d{2}").unwrap())
}

/// Split RIS text into per-record tag maps.
fn split_records(text: &str) -> Vec<RisFields> {
    let mut records = Vec::new();
    let mut current: RisFields = HashMap::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(caps) = tag_regex().captures(line) else {
            continue;
        };
        let tag = &caps[1];
        let value = caps[2].trim().to_string();

        match tag {
            "TY" => {
                current = HashMap::from([("TY".to_string(), vec![value])]);
            }
            "ER" => {
                if !current.is_empty() {
                    records.push(std::mem::take(&mut current));
                }
            }
            _ if current.is_empty() => {}
            _ => current.entry(tag.to_string()).or_default().push(value),
        }
    }

    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn values<'a>(fields: &'a RisFields, tag: &str) -> &'a [String] {
    fields.get(tag).map(Vec::as_slice).unwrap_or_default()
}

/// Values of the first tag in `tags` that is present and non-empty.
fn first_present<'a>(fields: &'a RisFields, tags: &[&str]) -> &'a [String] {
    tags.iter()
        .map(|t| values(fields, t))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn first_non_empty(fields: &RisFields, tag: &str) -> String {
    values(fields, tag)
        .iter()
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn pmid_of(fields: &RisFields) -> String {
    let pmid = first_non_empty(fields, "PM");
    if !pmid.is_empty() {
        return pmid;
    }
    values(fields, "M3")
        .iter()
        .find(|v| v.to_lowercase().starts_with("pmid"))
        .map(|v| v.replace("PMID", "").replace(':', "").trim().to_string())
        .unwrap_or_default()
}

fn year_of(fields: &RisFields) -> String {
    ["PY", "Y1", "DA"]
        .iter()
        .flat_map(|t| values(fields, t))
        .find_map(|candidate| year_regex().find(candidate))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn to_row(fields: &RisFields) -> StudyRow {
    StudyRow {
        record_type: values(fields, "TY").join("; "),
        title: first_present(fields, &["TI", "T1"]).join(" "),
        abstract_text: values(fields, "AB").join(" "),
        journal: first_present(fields, &["JO", "JF", "T2"]).join(" "),
        year: year_of(fields),
        authors: first_present(fields, &["AU", "A1"]).join("; "),
        doi: first_non_empty(fields, "DO"),
        pmid: pmid_of(fields),
        accession_number: first_non_empty(fields, "AN"),
        ..Default::default()
    }
}

/// Parse RIS text into rows. Provenance columns are left empty.
pub fn parse_ris(text: &str) -> Vec<StudyRow> {
    split_records(text).iter().map(to_row).collect()
}

/// Query label inferred from an export's file stem: `querya` → A, `queryb` → B.
pub fn source_query_id(path: &Path) -> &'static str {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if stem.contains("querya") {
        "A"
    } else if stem.contains("queryb") {
        "B"
    } else {
        ""
    }
}

/// Parse one RIS file and stamp provenance on every row.
pub fn normalize_ris_file(path: &Path, source_database: &str) -> Result<Vec<StudyRow>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let query_id = source_query_id(path);

    let rows: Vec<StudyRow> = parse_ris(&text)
        .into_iter()
        .map(|mut row| {
            row.source_database = source_database.to_string();
            row.source_file = file_name.clone();
            row.query_id = query_id.to_string();
            row
        })
        .collect();
    debug!(file = %path.display(), rows = rows.len(), "Parsed RIS export");
    Ok(rows)
}

/// Normalise every `*.ris` under `raw_dir` into `<out_dir>/<source>/<stem>.csv`.
///
/// Stale CSVs in the source's output directory are removed first. Returns the
/// written paths in input order.
pub fn normalize_ris_dir(raw_dir: &Path, source_database: &str, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let target = out_dir.join(source_database);
    if target.exists() {
        for stale in files_with_extension(&target, "csv", Some(1))? {
            fs::remove_file(&stale)?;
        }
    }

    if !raw_dir.is_dir() {
        warn!(dir = %raw_dir.display(), "no RIS export directory for source");
        return Ok(Vec::new());
    }
    let inputs = files_with_extension(raw_dir, "ris", Some(1))?;

    let mut written = Vec::with_capacity(inputs.len());
    for input in inputs {
        let rows = normalize_ris_file(&input, source_database)?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = target.join(format!("{stem}.csv"));
        write_rows_csv(&output, &rows)?;
        info!(input = %input.display(), output = %output.display(), rows = rows.len(), "Normalised RIS export");
        written.push(output);
    }
    Ok(written)
}
