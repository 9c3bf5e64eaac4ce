//! OpenAlex works search.
//!
//! Endpoint: https://api.openalex.org/works
//!
//! Cursor paging: the first request sends `cursor=*`, every response carries
//! `meta.next_cursor` (null on the last page). Abstracts arrive as an
//! inverted index and are kept in that form on the record.

use async_trait::async_trait;
use greylit_common::SandboxClient as Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::models::{AbstractText, IngestionSource, Record};
use super::{Cursor, Page, PagedSource};

const OPENALEX_URL: &str = "https://api.openalex.org/works";
const MAX_PER_PAGE: usize = 200;
const DOI_URL_PREFIX: &str = "https://doi.org/";

pub struct OpenAlexClient {
    client: Client,
    per_page: usize,
    mailto: Option<String>,
}

impl OpenAlexClient {
    /// `per_page` is clamped to the API maximum of 200.
    pub fn new(client: Client, per_page: usize, mailto: Option<String>) -> Self {
        Self {
            client,
            per_page: per_page.clamp(1, MAX_PER_PAGE),
            mailto: mailto.filter(|m| !m.trim().is_empty()),
        }
    }

    fn params(&self, query: &str, cursor: Option<&Cursor>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("search", query.to_string()),
            ("per-page", self.per_page.to_string()),
            ("cursor", cursor.map_or("*", Cursor::as_str).to_string()),
        ];
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }
}

fn work_to_record(item: &Value) -> Record {
    let abstract_text = match item.get("abstract_inverted_index") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value(v.clone()).unwrap_or_else(|_| AbstractText::Malformed(v.clone())),
        ),
    };
    let doi = item["doi"]
        .as_str()
        .filter(|d| !d.is_empty())
        .map(|d| d.replace(DOI_URL_PREFIX, ""));
    let authors = item["authorships"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|au| au["author"]["display_name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let mut record = Record {
        title: item["title"].as_str().map(String::from),
        abstract_text,
        doi,
        authors,
        year: item["publication_year"].as_i64().and_then(|y| i32::try_from(y).ok()),
        journal: item["host_venue"]["display_name"]
            .as_str()
            .or_else(|| item["primary_location"]["source"]["display_name"].as_str())
            .map(String::from),
        ..Default::default()
    };
    record.set_extra("id", item.get("id").cloned());
    record.set_extra("type", item.get("type").cloned());
    record.set_extra("primary_location", item["primary_location"].get("landing_page_url").cloned());
    record.set_extra("host_venue", item["host_venue"].get("display_name").cloned());
    record.set_extra("authorships", item.get("authorships").cloned());
    record.set_extra("open_access", item.get("open_access").cloned());
    record
}

/// Parse one `/works` response into a page.
pub fn parse_works_page(payload: &Value) -> Page {
    let records = payload["results"]
        .as_array()
        .map(|works| works.iter().map(work_to_record).collect())
        .unwrap_or_default();
    let next = payload["meta"]["next_cursor"].as_str().and_then(Cursor::new);
    Page::new(records, next)
}

#[async_trait]
impl PagedSource for OpenAlexClient {
    fn name(&self) -> &str {
        IngestionSource::OpenAlex.as_str()
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> anyhow::Result<Page> {
        let payload: Value = self.client
            .get(OPENALEX_URL)?
            .query(&self.params(query, cursor))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_works_page(&payload);
        debug!(n = page.records.len(), has_next = page.next_cursor.is_some(), "OpenAlex works retrieved");
        Ok(page)
    }
}
