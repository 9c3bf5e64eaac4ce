//! Persisted outputs: raw JSONL, RIS candidates, and the flat CSV row format.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use greylit_common::Result;

use crate::models::{Record, StudyRow, STUDY_ROW_COLUMNS};

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Write one JSON object per line, overwriting `path`.
pub fn write_jsonl(path: &Path, records: &[Record]) -> Result<()> {
    let mut out = create(path)?;
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Read records back from a JSONL file; blank lines are skipped.
pub fn read_jsonl(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

fn ris_line(out: &mut impl Write, tag: &str, value: &str) -> std::io::Result<()> {
    writeln!(out, "{tag}  - {value}")
}

fn extra_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.extra.get(key).and_then(Value::as_str)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Render records as a generic RIS export.
pub fn render_ris(out: &mut impl Write, records: &[Record]) -> std::io::Result<()> {
    for r in records {
        let title = non_blank(r.title.as_deref()).unwrap_or("Untitled");
        let summary = r.summary_text();
        let url = non_blank(r.url.as_deref())
            .or_else(|| non_blank(extra_str(r, "primary_location")))
            .or_else(|| non_blank(extra_str(r, "id")));

        ris_line(out, "TY", "GEN")?;
        ris_line(out, "TI", title)?;
        if let Some(abs) = non_blank(summary.as_deref()) {
            ris_line(out, "AB", abs)?;
        }
        if let Some(year) = r.year {
            ris_line(out, "PY", &year.to_string())?;
        }
        if let Some(doi) = non_blank(r.doi.as_deref()) {
            ris_line(out, "DO", doi)?;
        }
        if let Some(url) = url {
            ris_line(out, "UR", url)?;
        }
        ris_line(out, "DB", non_blank(r.source.as_deref()).unwrap_or("grey_search"))?;
        ris_line(out, "ER", "")?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_ris(path: &Path, records: &[Record]) -> Result<()> {
    let mut out = create(path)?;
    render_ris(&mut out, records)?;
    out.flush()?;
    Ok(())
}

pub fn records_to_rows(records: &[Record]) -> Vec<StudyRow> {
    records.iter().map(Record::to_study_row).collect()
}

/// Write rows with the fixed header, even when `rows` is empty.
pub fn write_rows_csv(path: &Path, rows: &[StudyRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(create(path)?);
    writer.write_record(STUDY_ROW_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a normalized CSV. Columns may appear in any order; missing ones are
/// left empty.
pub fn read_rows_csv(path: &Path) -> Result<Vec<StudyRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Files under `dir` whose extension matches `ext` (ASCII case-insensitive),
/// sorted by name within each directory. `max_depth` 1 lists only `dir`
/// itself; `None` walks the whole tree.
pub fn files_with_extension(dir: &Path, ext: &str, max_depth: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let mut found = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Every `*.csv` under `dir`, recursively.
pub fn find_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    files_with_extension(dir, "csv", None)
}
