//! SerpAPI search-engine results (Google, Google Scholar, ...).
//!
//! Endpoint: https://serpapi.com/search.json
//!
//! Paged by a `start` offset of 10 per page. The API never signals the last
//! page other than by returning no organic results, so callers bound the
//! number of pages (`max_pages_google_like`).

use async_trait::async_trait;
use greylit_common::SandboxClient as Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::models::{IngestionSource, Record};
use super::{Cursor, Page, PagedSource};

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const RESULTS_PER_PAGE: usize = 10;

pub struct SerpApiClient {
    client: Client,
    engine: String,
    api_key: SecretString,
    name: String,
}

impl SerpApiClient {
    pub fn new(client: Client, engine: &str, api_key: SecretString) -> Self {
        Self {
            client,
            engine: engine.to_string(),
            api_key,
            name: format!("{}_{}", IngestionSource::SerpApi, engine),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }
}

/// Organic results of one response, tagged with the engine that produced them.
pub fn parse_organic_results(payload: &Value, engine: &str) -> Vec<Record> {
    payload["organic_results"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let mut r = Record {
                        title: item["title"].as_str().map(String::from),
                        snippet: item["snippet"].as_str().map(String::from),
                        url: item["link"].as_str().map(String::from),
                        ..Default::default()
                    };
                    r.set_extra("engine", json!(engine));
                    r
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PagedSource for SerpApiClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(engine = %self.engine))]
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> anyhow::Result<Page> {
        let start: usize = match cursor {
            Some(c) => c.as_str().parse()?,
            None => 0,
        };
        let params = [
            ("engine", self.engine.clone()),
            ("q", query.to_string()),
            ("api_key", self.api_key.expose_secret().to_string()),
            ("start", start.to_string()),
        ];

        let payload: Value = self.client
            .get(SERPAPI_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = parse_organic_results(&payload, &self.engine);
        debug!(start, n = records.len(), "SerpAPI results retrieved");
        Ok(Page::new(records, Cursor::new((start + RESULTS_PER_PAGE).to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_organic_results() {
        let payload = json!({
            "search_metadata": {"status": "Success"},
            "organic_results": [
                {"position": 1, "title": "Post-arrest follow-up toolkit", "link": "https://example.org/toolkit.pdf", "snippet": "A toolkit for survivors"},
                {"position": 2, "title": "No snippet"}
            ]
        });
        let records = parse_organic_results(&payload, "google_scholar");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title.as_deref(), Some("Post-arrest follow-up toolkit"));
        assert_eq!(records[0].url.as_deref(), Some("https://example.org/toolkit.pdf"));
        assert_eq!(records[0].summary_text().as_deref(), Some("A toolkit for survivors"));
        assert_eq!(records[0].extra["engine"], json!("google_scholar"));
        assert!(records[1].snippet.is_none());
    }

    #[test]
    fn test_no_organic_results_is_empty_page() {
        assert!(parse_organic_results(&json!({"error": "no results"}), "google").is_empty());
    }

    #[test]
    fn test_source_name_includes_engine() {
        let c = SerpApiClient::new(Client::new().unwrap(), "google", SecretString::from("k".to_string()));
        assert_eq!(c.name(), "serpapi_google");
        assert_eq!(c.engine(), "google");
    }
}
