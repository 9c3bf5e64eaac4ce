//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!
//! One page = one esearch window of PMIDs (`retstart`/`retmax`) followed by
//! an efetch of those PMIDs as XML. The cursor is the next `retstart` offset.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use greylit_common::{GreylitError, Result, SandboxClient as Client};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::models::{IngestionSource, Record};
use super::{Cursor, Page, PagedSource};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL:  &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

pub struct PubMedClient {
    client: Client,
    page_size: usize,
    api_key: Option<SecretString>,
}

impl PubMedClient {
    pub fn new(client: Client, page_size: usize, api_key: Option<SecretString>) -> Self {
        Self { client, page_size: page_size.max(1), api_key }
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.expose_secret().to_string()));
        }
        params
    }

    /// One window of PMIDs and the total hit count.
    #[instrument(skip(self))]
    async fn esearch(&self, query: &str, retstart: usize) -> anyhow::Result<(Vec<String>, usize)> {
        let mut params = self.base_params();
        params.push(("term", query.to_string()));
        params.push(("retstart", retstart.to_string()));
        params.push(("retmax", self.page_size.to_string()));
        params.push(("retmode", "json".to_string()));

        let resp: Value = self.client
            .get(ESEARCH_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(parse_esearch(&resp))
    }

    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> anyhow::Result<Vec<Record>> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }
        let mut params = self.base_params();
        params.push(("id", pmids.join(",")));
        params.push(("retmode", "xml".to_string()));

        let xml = self.client
            .get(EFETCH_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_pubmed_xml(&xml)?)
    }
}

/// PMIDs and total count from an esearch JSON response.
fn parse_esearch(resp: &Value) -> (Vec<String>, usize) {
    let result = &resp["esearchresult"];
    let ids = result["idlist"]
        .as_array()
        .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let count = result["count"]
        .as_str()
        .and_then(|c| c.parse().ok())
        .or_else(|| result["count"].as_u64().map(|c| c as usize))
        .unwrap_or(0);
    (ids, count)
}

/// Offset of the next window, or `None` once `count` is reached.
fn next_offset(retstart: usize, fetched: usize, count: usize) -> Option<Cursor> {
    let next = retstart + fetched;
    if fetched == 0 || next >= count {
        None
    } else {
        Cursor::new(next.to_string())
    }
}

#[async_trait]
impl PagedSource for PubMedClient {
    fn name(&self) -> &str {
        IngestionSource::PubMed.as_str()
    }

    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> anyhow::Result<Page> {
        let retstart: usize = match cursor {
            Some(c) => c.as_str().parse()?,
            None => 0,
        };
        let (pmids, count) = self.esearch(query, retstart).await?;
        let mut records = self.efetch(&pmids).await?;

        let date_retrieved = Utc::now().date_naive().to_string();
        for r in &mut records {
            r.set_extra("date_retrieved", json!(date_retrieved));
        }
        debug!(retstart, count, n = records.len(), "PubMed page retrieved");
        Ok(Page::new(records, next_offset(retstart, pmids.len(), count)))
    }
}

// ---------------------------------------------------------------------------
// QC flags
// ---------------------------------------------------------------------------

fn instrument_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\beq[- ]?5d\b|\bsf[- ]?36\b|\bsf[- ]?12\b|\b15d\b|\bhui\b|\bwhoqol\b|\bsip\b|\bnhp\b|\bpromis\b|\bvr[- ]?12\b|\bvr[- ]?36\b|\bqwb\b|\bqolibri\b",
        )
        .unwrap()
    })
}

fn hrqol_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)quality of life|\bhrqol\b|\bqol\b|patient-reported|\bprom\b").unwrap()
    })
}

fn timepoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d+)\s*(day|days|week|weeks|month|months|year|years)\b|follow-up|post-discharge|after discharge|at discharge",
        )
        .unwrap()
    })
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19|20)\d{2}").unwrap())
}

/// Screening hints over title + abstract: named HRQoL instrument, quality of
/// life language, follow-up timepoint language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QcFlags {
    pub instrument_token: bool,
    pub hrqol_language: bool,
    pub timepoint_language: bool,
}

impl QcFlags {
    pub fn detect(title: &str, abstract_text: &str) -> Self {
        let blob = format!("{title}\n{abstract_text}").to_lowercase();
        Self {
            instrument_token: instrument_regex().is_match(&blob),
            hrqol_language: hrqol_regex().is_match(&blob),
            timepoint_language: timepoint_regex().is_match(&blob),
        }
    }
}

// ---------------------------------------------------------------------------
// efetch XML
// ---------------------------------------------------------------------------

/// An open element and the text collected beneath it.
struct Open {
    name: String,
    label: Option<String>,
    id_type: Option<String>,
    text: String,
}

impl Open {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let attr = |key: &str| {
            e.try_get_attribute(key)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        };
        Self {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            label: attr("Label"),
            id_type: attr("IdType"),
            text: String::new(),
        }
    }
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: String,
    doi: String,
    title: String,
    abstract_parts: Vec<String>,
    journal: String,
    pub_year: String,
    article_year: String,
    completed_year: String,
    created_year: String,
    medline_date: String,
    authors: Vec<String>,
    last_name: String,
    initials: String,
    collective: String,
    publication_types: Vec<String>,
    mesh_terms: Vec<String>,
}

impl ArticleBuilder {
    /// Handle a closed element given its parent's name.
    fn close(&mut self, el: Open, parent: &str) {
        let text = el.text.trim().to_string();
        match (el.name.as_str(), parent) {
            ("PMID", "MedlineCitation") if self.pmid.is_empty() => self.pmid = text,
            ("ArticleTitle", _) => self.title = text,
            ("AbstractText", "Abstract") if !text.is_empty() => {
                self.abstract_parts.push(match el.label {
                    Some(label) if !label.is_empty() => format!("{label}: {text}"),
                    _ => text,
                });
            }
            ("Title", "Journal") => self.journal = text,
            ("Year", "PubDate") if self.pub_year.is_empty() => self.pub_year = text,
            ("Year", "ArticleDate") if self.article_year.is_empty() => self.article_year = text,
            ("Year", "DateCompleted") => self.completed_year = text,
            ("Year", "DateCreated") => self.created_year = text,
            ("MedlineDate", "PubDate") => self.medline_date = text,
            ("LastName", "Author") => self.last_name = text,
            ("Initials", "Author") => self.initials = text,
            ("CollectiveName", "Author") => self.collective = text,
            ("Author", "AuthorList") => {
                let name = if !self.collective.is_empty() {
                    std::mem::take(&mut self.collective)
                } else {
                    format!("{} {}", self.last_name, self.initials).trim().to_string()
                };
                if !name.is_empty() {
                    self.authors.push(name);
                }
                self.last_name.clear();
                self.initials.clear();
                self.collective.clear();
            }
            ("ArticleId", _)
                if self.doi.is_empty()
                    && !text.is_empty()
                    && el.id_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("doi")) =>
            {
                self.doi = text.to_lowercase();
            }
            ("PublicationType", "PublicationTypeList") if !text.is_empty() => {
                self.publication_types.push(text)
            }
            ("DescriptorName", "MeshHeading") if !text.is_empty() => self.mesh_terms.push(text),
            _ => {}
        }
    }

    /// PubDate → ArticleDate → DateCompleted → DateCreated → year in MedlineDate.
    fn year(&self) -> Option<i32> {
        [&self.pub_year, &self.article_year, &self.completed_year, &self.created_year]
            .into_iter()
            .find(|y| !y.is_empty())
            .and_then(|y| y.parse().ok())
            .or_else(|| {
                year_regex()
                    .find(&self.medline_date)
                    .and_then(|m| m.as_str().parse().ok())
            })
    }

    fn build(self) -> Record {
        let year = self.year();
        let abstract_text = self.abstract_parts.join("\n");
        let flags = QcFlags::detect(&self.title, &abstract_text);
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

        let mut record = Record {
            title: non_empty(self.title),
            abstract_text: non_empty(abstract_text).map(Into::into),
            url: non_empty(self.pmid.clone()).map(|p| format!("https://pubmed.ncbi.nlm.nih.gov/{p}/")),
            pmid: non_empty(self.pmid),
            doi: non_empty(self.doi),
            authors: self.authors,
            year,
            journal: non_empty(self.journal),
            ..Default::default()
        };
        if !self.publication_types.is_empty() {
            record.set_extra("publication_types", json!(self.publication_types));
        }
        if !self.mesh_terms.is_empty() {
            record.set_extra("mesh_terms", json!(self.mesh_terms));
        }
        record.set_extra("flag_instrument_token", json!(flags.instrument_token));
        record.set_extra("flag_hrqol_language", json!(flags.hrqol_language));
        record.set_extra("flag_timepoint_language", json!(flags.timepoint_language));
        record
    }
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>...`) into records.
///
/// Text of nested inline markup (`<i>`, `<sup>`, ...) is folded into the
/// enclosing element. Malformed XML fails the whole page.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Open> = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let open = Open::from_start(e);
                if open.name == "PubmedArticle" {
                    current = Some(ArticleBuilder::default());
                }
                stack.push(open);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                let Some(el) = stack.pop() else { continue };
                if el.name == "PubmedArticle" {
                    if let Some(article) = current.take() {
                        records.push(article.build());
                    }
                    continue;
                }
                if let Some(parent) = stack.last_mut() {
                    parent.text.push_str(&el.text);
                }
                if let Some(article) = current.as_mut() {
                    let parent = stack.last().map(|p| p.name.as_str()).unwrap_or_default();
                    article.close(el, parent);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GreylitError::Xml(format!(
                    "efetch response at byte {}: {e}",
                    reader.error_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}
