//! Per-(source, query) pagination with a hard cap and early stopping.
//!
//! A pairing pages through its source until one of:
//!   - the source returns an empty page (exhausted),
//!   - the source returns no next cursor,
//!   - `n_max_per_query` records have been collected,
//!   - `zero_hit_streak_stop` consecutive irrelevant records were seen after
//!     the first `warmup_n` records.
//!
//! The cap and the early stop are checked after every record, so a pairing can
//! end in the middle of a page. Fetch errors are not retried here.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, instrument};

use greylit_common::{QuerySpec, ScoringConfig, StopConfig};

use crate::models::Record;
use crate::scoring;
use crate::sources::{Cursor, PagedSource};

/// Why a pairing stopped paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The source returned an empty page.
    Exhausted,
    /// The last page carried no next cursor.
    NoNextCursor,
    /// `n_max_per_query` records collected.
    CapReached,
    /// Too many consecutive irrelevant records after warmup.
    EarlyStop { irrelevant_streak: usize, collected: usize },
    /// Page budget used up (sources drained without relevance stopping).
    PageLimit,
}

/// Running state of one pairing. Each step consumes the state and returns the
/// next one, so a single transition can be tested on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoppingState {
    pub collected: usize,
    pub irrelevant_streak: usize,
    pub cursor: Option<Cursor>,
}

impl StoppingState {
    /// Account for one record appended to the collection.
    ///
    /// Relevance is only computed once the warmup window is full.
    pub fn observe(
        self,
        record: &Record,
        rules: &StopConfig,
        scoring_cfg: &ScoringConfig,
    ) -> (Self, Option<StopReason>) {
        let collected = self.collected + 1;
        let mut irrelevant_streak = self.irrelevant_streak;

        if collected > rules.warmup_n {
            if scoring::is_relevant(record, scoring_cfg) {
                irrelevant_streak = 0;
            } else {
                irrelevant_streak += 1;
            }
        }

        let next = Self { collected, irrelevant_streak, cursor: self.cursor };

        if collected > rules.warmup_n && irrelevant_streak >= rules.zero_hit_streak_stop {
            return (next, Some(StopReason::EarlyStop { irrelevant_streak, collected }));
        }
        if collected >= rules.n_max_per_query {
            return (next, Some(StopReason::CapReached));
        }
        (next, None)
    }

    /// Move to the next page; `None` when the source has no more pages.
    pub fn advance(self, next_cursor: Option<Cursor>) -> Self {
        Self { cursor: next_cursor, ..self }
    }
}

/// Records gathered by one pairing and how it ended.
#[derive(Debug, Clone)]
pub struct Collection {
    pub records: Vec<Record>,
    pub stop: StopReason,
    pub pages_fetched: usize,
}

fn tag(record: &mut Record, source: &dyn PagedSource, query: &QuerySpec) {
    record.source = Some(source.name().to_string());
    record.query_id = Some(query.id.clone());
}

async fn courtesy_pause(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Page through `source` for `query` under the stopping rules.
///
/// Never returns more than `n_max_per_query` records.
#[instrument(skip_all, fields(source = source.name(), query_id = %query.id))]
pub async fn collect(
    source: &dyn PagedSource,
    query: &QuerySpec,
    rules: &StopConfig,
    scoring_cfg: &ScoringConfig,
) -> anyhow::Result<Collection> {
    let n_max = rules.n_max_per_query;
    let mut state = StoppingState::default();
    let mut records: Vec<Record> = Vec::new();
    let mut pages_fetched = 0;

    while state.collected < n_max {
        let page = source
            .fetch_page(&query.text, state.cursor.as_ref())
            .await
            .with_context(|| {
                format!("{} page {} for query {}", source.name(), pages_fetched + 1, query.id)
            })?;
        pages_fetched += 1;

        if page.records.is_empty() {
            debug!(collected = records.len(), "source exhausted");
            return Ok(Collection { records, stop: StopReason::Exhausted, pages_fetched });
        }

        for mut record in page.records {
            tag(&mut record, source, query);
            let (next, decision) = state.observe(&record, rules, scoring_cfg);
            state = next;
            records.push(record);

            if let Some(stop) = decision {
                records.truncate(n_max);
                if let StopReason::EarlyStop { irrelevant_streak, collected } = &stop {
                    info!(irrelevant_streak, collected, "early stop on irrelevant streak");
                }
                return Ok(Collection { records, stop, pages_fetched });
            }
        }

        state = state.advance(page.next_cursor);
        if state.cursor.is_none() {
            return Ok(Collection { records, stop: StopReason::NoNextCursor, pages_fetched });
        }

        courtesy_pause(rules.page_delay_ms).await;
    }

    Ok(Collection { records, stop: StopReason::CapReached, pages_fetched })
}

/// Page through `source` without relevance stopping, up to `max_pages` pages.
#[instrument(skip_all, fields(source = source.name(), query_id = %query.id))]
pub async fn collect_pages(
    source: &dyn PagedSource,
    query: &QuerySpec,
    max_pages: usize,
    page_delay_ms: u64,
) -> anyhow::Result<Collection> {
    let mut records = Vec::new();
    let mut cursor: Option<Cursor> = None;

    for page_no in 0..max_pages {
        let page = source
            .fetch_page(&query.text, cursor.as_ref())
            .await
            .with_context(|| format!("{} page {} for query {}", source.name(), page_no + 1, query.id))?;

        if page.records.is_empty() {
            return Ok(Collection { records, stop: StopReason::Exhausted, pages_fetched: page_no + 1 });
        }
        records.extend(page.records.into_iter().map(|mut r| {
            tag(&mut r, source, query);
            r
        }));

        cursor = page.next_cursor;
        if cursor.is_none() {
            return Ok(Collection { records, stop: StopReason::NoNextCursor, pages_fetched: page_no + 1 });
        }
        courtesy_pause(page_delay_ms).await;
    }

    Ok(Collection { records, stop: StopReason::PageLimit, pages_fetched: max_pages })
}
