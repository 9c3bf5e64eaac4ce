//! Data models for the acquisition pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sources the pipeline knows how to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionSource {
    OpenAlex,
    ClinicalTrials,
    PubMed,
    SeedSites,
    SerpApi,
}

impl IngestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionSource::OpenAlex       => "openalex",
            IngestionSource::ClinicalTrials => "clinicaltrials",
            IngestionSource::PubMed         => "pubmed",
            IngestionSource::SeedSites      => "seed_sites",
            IngestionSource::SerpApi        => "serpapi",
        }
    }
}

impl fmt::Display for IngestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract as delivered by a source.
///
/// OpenAlex ships abstracts as an inverted index (token → positions) that must
/// be rebuilt before any text matching. Anything else that is not a string is
/// kept as-is and coerced to its JSON text when read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AbstractText {
    Plain(String),
    InvertedIndex(BTreeMap<String, Vec<u32>>),
    Malformed(Value),
}

impl AbstractText {
    pub fn is_empty(&self) -> bool {
        match self {
            AbstractText::Plain(s) => s.is_empty(),
            AbstractText::InvertedIndex(idx) => idx.is_empty(),
            AbstractText::Malformed(v) => match v {
                Value::Null => true,
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            },
        }
    }

    /// Plain text form; inverted indexes are rebuilt in ascending position order.
    pub fn to_text(&self) -> String {
        match self {
            AbstractText::Plain(s) => s.clone(),
            AbstractText::InvertedIndex(idx) => reconstitute_inverted_index(idx),
            AbstractText::Malformed(v) => v.to_string(),
        }
    }
}

impl From<&str> for AbstractText {
    fn from(s: &str) -> Self {
        AbstractText::Plain(s.to_string())
    }
}

impl From<String> for AbstractText {
    fn from(s: String) -> Self {
        AbstractText::Plain(s)
    }
}

/// Rebuild text from an OpenAlex `abstract_inverted_index`.
pub fn reconstitute_inverted_index(idx: &BTreeMap<String, Vec<u32>>) -> String {
    let mut positions: BTreeMap<u32, &str> = BTreeMap::new();
    for (word, pos_list) in idx {
        for pos in pos_list {
            positions.insert(*pos, word.as_str());
        }
    }
    positions.into_values().collect::<Vec<_>>().join(" ")
}

/// One bibliographic or trial record, normalized at the adapter boundary.
///
/// Only the fields the core reads are typed; everything source-specific lives
/// in `extra` and is serialized flat alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<AbstractText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nct_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looks_relevant: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn with_title(title: &str) -> Self {
        Self { title: Some(title.to_string()), ..Default::default() }
    }

    /// Abstract text if present and non-empty, otherwise the snippet.
    pub fn summary_text(&self) -> Option<String> {
        match &self.abstract_text {
            Some(a) if !a.is_empty() => Some(a.to_text()),
            _ => self.snippet.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Store a source-specific field; `None` values are skipped.
    pub fn set_extra(&mut self, key: &str, value: impl Into<Option<Value>>) {
        if let Some(v) = value.into() {
            if !v.is_null() {
                self.extra.insert(key.to_string(), v);
            }
        }
    }

    /// Flatten into the fixed tabular column set.
    pub fn to_study_row(&self) -> StudyRow {
        StudyRow {
            source_database: self.source.clone().unwrap_or_default(),
            source_file: String::new(),
            record_type: self
                .extra
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            title: self.title.clone().unwrap_or_default(),
            abstract_text: self
                .abstract_text
                .as_ref()
                .map(AbstractText::to_text)
                .unwrap_or_default(),
            journal: self.journal.clone().unwrap_or_default(),
            year: self.year.map(|y| y.to_string()).unwrap_or_default(),
            authors: self.authors.join("; "),
            doi: self.doi.clone().unwrap_or_default(),
            pmid: self.pmid.clone().unwrap_or_default(),
            accession_number: self
                .accession_number
                .clone()
                .or_else(|| self.nct_id.clone())
                .unwrap_or_default(),
            query_id: self.query_id.clone().unwrap_or_default(),
        }
    }
}

/// A flattened row in the normalized tabular export.
///
/// `query_id` holds pipe-delimited provenance tokens once rows are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRow {
    #[serde(default)]
    pub source_database: String,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub pmid: String,
    #[serde(default)]
    pub accession_number: String,
    #[serde(default)]
    pub query_id: String,
}

/// Column order of the tabular export.
pub const STUDY_ROW_COLUMNS: [&str; 12] = [
    "source_database",
    "source_file",
    "record_type",
    "title",
    "abstract",
    "journal",
    "year",
    "authors",
    "doi",
    "pmid",
    "accession_number",
    "query_id",
];
