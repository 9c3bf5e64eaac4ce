//! greylit-ingestion — Grey-literature acquisition pipeline.
//! - Paged source adapters (OpenAlex, ClinicalTrials.gov, PubMed, SerpAPI)
//!   and the seed-site crawler
//! - Relevance scoring and per-pairing stopping rules
//! - Cross-source deduplication
//! - RIS normalisation and batch merge of tabular exports
//! - JSONL, RIS and CSV outputs plus the run event log

pub mod sources;
pub mod dedup;
pub mod event_log;
pub mod export;
pub mod models;
pub mod normalise;
pub mod pipeline;
pub mod reconcile;
pub mod scoring;
pub mod stopping;

pub use models::{AbstractText, IngestionSource, Record, StudyRow};
pub use pipeline::{run_merge, run_normalize, run_search, SearchProgress, SearchSummary};
