//! Smoke tests against the live APIs.
//!
//! Run with: cargo test --package greylit-ingestion --test test_live_sources -- --ignored --nocapture

use greylit_common::SandboxClient;
use greylit_ingestion::sources::clinicaltrials::ClinicalTrialsClient;
use greylit_ingestion::sources::openalex::OpenAlexClient;
use greylit_ingestion::sources::pubmed::PubMedClient;
use greylit_ingestion::sources::PagedSource;

#[tokio::test]
#[ignore] // Requires network access
async fn test_openalex_first_page() {
    let client = OpenAlexClient::new(SandboxClient::new().unwrap(), 25, None);
    let page = client
        .fetch_page("cardiac arrest quality of life", None)
        .await
        .expect("OpenAlex search failed");

    println!("Found {} works", page.records.len());
    for r in page.records.iter().take(5) {
        println!("- {:?} ({:?})", r.title, r.doi);
    }
    assert!(!page.records.is_empty());
    assert!(page.next_cursor.is_some());
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_clinicaltrials_first_page() {
    let client = ClinicalTrialsClient::new(SandboxClient::new().unwrap());
    let page = client
        .fetch_page("cardiac arrest rehabilitation", None)
        .await
        .expect("ClinicalTrials.gov search failed");

    assert!(!page.records.is_empty());
    assert!(page.records.iter().all(|r| r.nct_id.is_some()));
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_pubmed_paging() {
    let client = PubMedClient::new(SandboxClient::new().unwrap(), 5, None);
    let first = client
        .fetch_page("cardiac arrest[tiab] AND quality of life[tiab]", None)
        .await
        .expect("PubMed search failed");

    assert_eq!(first.records.len(), 5);
    assert_eq!(first.next_cursor.as_ref().map(|c| c.as_str()), Some("5"));
    for r in &first.records {
        println!("{:?} {:?} {:?}", r.pmid, r.year, r.title);
    }
}
