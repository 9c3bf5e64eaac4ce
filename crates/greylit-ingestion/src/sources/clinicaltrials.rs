//! ClinicalTrials.gov v2 API client.
//!
//! API docs: https://clinicaltrials.gov/data-api/api
//! Endpoint: https://clinicaltrials.gov/api/v2/studies
//!
//! Maps each study to a [`Record`] with:
//!   - title    = briefTitle
//!   - abstract = briefSummary
//!   - nct_id   = nctId (also the study URL)
//!   - extra    = status, start/completion dates, conditions, outcomes
//!
//! Paging uses the opaque `nextPageToken`.

use async_trait::async_trait;
use greylit_common::SandboxClient as Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::models::{IngestionSource, Record};
use super::{Cursor, Page, PagedSource};

const CT_API_URL: &str = "https://clinicaltrials.gov/api/v2/studies";
const PAGE_SIZE: usize = 100;

pub struct ClinicalTrialsClient {
    client: Client,
}

impl ClinicalTrialsClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Text of a description field; older payloads wrap it in `textBlock`.
fn text_field(v: &Value) -> Option<String> {
    v.as_str()
        .or_else(|| v["textBlock"].as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn study_to_record(study: &Value) -> Record {
    let proto = &study["protocolSection"];
    let id_mod = &proto["identificationModule"];
    let status_mod = &proto["statusModule"];
    let desc_mod = &proto["descriptionModule"];
    let outcomes_mod = &proto["outcomesModule"];
    let cond_mod = &proto["conditionsModule"];

    let nct_id = id_mod["nctId"].as_str().filter(|s| !s.is_empty()).map(String::from);

    let mut record = Record {
        title: id_mod["briefTitle"].as_str().map(String::from),
        abstract_text: text_field(&desc_mod["briefSummary"]).map(Into::into),
        url: nct_id.as_ref().map(|id| format!("https://clinicaltrials.gov/study/{id}")),
        nct_id,
        ..Default::default()
    };
    record.set_extra("status", status_mod.get("overallStatus").cloned());
    record.set_extra("start_date", status_mod["startDateStruct"].get("date").cloned());
    record.set_extra("completion_date", status_mod["completionDateStruct"].get("date").cloned());
    record.set_extra("conditions", cond_mod.get("conditions").cloned());
    record.set_extra("primary_outcomes", outcomes_mod.get("primaryOutcomes").cloned());
    record.set_extra("secondary_outcomes", outcomes_mod.get("secondaryOutcomes").cloned());
    record
}

/// Parse one v2 `studies` response into a page.
pub fn parse_studies_page(payload: &Value) -> Page {
    let records = payload["studies"]
        .as_array()
        .map(|studies| studies.iter().map(study_to_record).collect())
        .unwrap_or_default();
    let next = payload["nextPageToken"].as_str().and_then(Cursor::new);
    Page::new(records, next)
}

#[async_trait]
impl PagedSource for ClinicalTrialsClient {
    fn name(&self) -> &str {
        IngestionSource::ClinicalTrials.as_str()
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> anyhow::Result<Page> {
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![("query.term", query), ("pageSize", page_size.as_str())];
        if let Some(token) = cursor {
            params.push(("pageToken", token.as_str()));
        }

        let payload: Value = self.client
            .get(CT_API_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_studies_page(&payload);
        debug!(n = page.records.len(), has_next = page.next_cursor.is_some(), "ClinicalTrials.gov studies retrieved");
        Ok(page)
    }
}
