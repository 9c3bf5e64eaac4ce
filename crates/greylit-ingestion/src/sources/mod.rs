//! Source adapters.
//!
//! Every paged source implements [`PagedSource`]: one call returns one page of
//! records plus the cursor for the next page. The core never looks inside a
//! cursor.

pub mod clinicaltrials;
pub mod openalex;
pub mod pubmed;
pub mod seedsites;
pub mod serpapi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Record;

/// Opaque pagination token defined by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// `None` for an empty token, which sources use to mean "no more pages".
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() { None } else { Some(Self(token)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Empty means the source is exhausted.
    pub records: Vec<Record>,
    /// `None` means no further pages even if `records` is non-empty.
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn new(records: Vec<Record>, next_cursor: Option<Cursor>) -> Self {
        Self { records, next_cursor }
    }

    pub fn last(records: Vec<Record>) -> Self {
        Self { records, next_cursor: None }
    }
}

/// Common interface for all paged sources.
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Name stamped on every record as `source`.
    fn name(&self) -> &str;

    /// Fetch one page; `cursor` is `None` for the first page.
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> anyhow::Result<Page>;
}
