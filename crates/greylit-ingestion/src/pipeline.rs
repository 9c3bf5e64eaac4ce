//! End-to-end acquisition pipeline.
//!
//! `run_search` orchestrates one full run:
//!   1. For each query, page every enabled API source (OpenAlex,
//!      ClinicalTrials.gov, PubMed) under the stopping rules
//!   2. Crawl the seed sites
//!   3. For each query and engine, page SerpAPI up to the page cap
//!   4. Score every record, keep those at or above the threshold
//!   5. Deduplicate across sources
//!   6. Write raw JSONL per pairing, the deduplicated RIS and CSV
//!   7. Emit progress events via broadcast channel and audit events to the
//!      JSONL event log
//!
//! A failing pairing is recorded and the run moves on. Configuration errors
//! abort before any network call.
//!
//! `run_normalize` and `run_merge` are the offline steps that turn database
//! exports into rows and reconcile rows from every source.

use std::path::{Path, PathBuf};

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use greylit_common::{GreylitError, QuerySpec, SandboxClient, SearchConfig};

use crate::dedup::dedupe;
use crate::event_log::{Event, EventLog};
use crate::export::{find_csv_files, read_rows_csv, records_to_rows, write_jsonl, write_ris, write_rows_csv};
use crate::models::{IngestionSource, Record};
use crate::normalise::{normalize_pubmed_jsonl, normalize_ris_dir};
use crate::reconcile::{merge, MergeStats, TieBreak};
use crate::scoring::annotate;
use crate::sources::clinicaltrials::ClinicalTrialsClient;
use crate::sources::openalex::OpenAlexClient;
use crate::sources::pubmed::PubMedClient;
use crate::sources::seedsites::{harvest_seed_sites, CrawlFailure, HttpFetcher, PageFetcher};
use crate::sources::serpapi::SerpApiClient;
use crate::sources::PagedSource;
use crate::stopping::{collect, collect_pages, Collection, StopReason};

pub const DEDUPED_RIS: &str = "grey_candidates_deduped.ris";
pub const DEDUPED_CSV: &str = "grey_candidates_deduped.csv";
pub const MERGED_CSV: &str = "merged_deduped.csv";

// ── Sources ───────────────────────────────────────────────────────────────────

/// Everything a run fetches from.
pub struct SearchSources {
    /// Paged per query with relevance stopping.
    pub paged: Vec<Box<dyn PagedSource>>,
    /// Paged per query up to `max_pages_google_like`, no relevance stopping.
    pub capped: Vec<Box<dyn PagedSource>>,
    pub crawler: Box<dyn PageFetcher>,
}

impl SearchSources {
    /// Build the live HTTP sources enabled in `config`.
    ///
    /// Fails with a configuration error when SerpAPI is enabled without a key.
    pub fn from_config(config: &SearchConfig) -> anyhow::Result<Self> {
        let serp_key = config.resolve_serpapi_key()?;
        let client = SandboxClient::new()?;
        let toggles = &config.sources;

        let mut paged: Vec<Box<dyn PagedSource>> = Vec::new();
        if toggles.openalex {
            paged.push(Box::new(OpenAlexClient::new(
                client.clone(),
                toggles.openalex_per_page,
                toggles.openalex_mailto.clone(),
            )));
        }
        if toggles.clinicaltrials {
            paged.push(Box::new(ClinicalTrialsClient::new(client.clone())));
        }
        if toggles.pubmed {
            paged.push(Box::new(PubMedClient::new(
                client.clone(),
                toggles.pubmed_page_size,
                config.resolve_pubmed_key(),
            )));
        }

        let mut capped: Vec<Box<dyn PagedSource>> = Vec::new();
        if let Some(key) = serp_key {
            for engine in &config.serpapi.engines {
                let engine_key = SecretString::from(key.expose_secret().to_string());
                capped.push(Box::new(SerpApiClient::new(client.clone(), engine, engine_key)));
            }
        }

        Ok(Self {
            paged,
            capped,
            crawler: Box::new(HttpFetcher::for_sites(&config.seed_sites)?),
        })
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct SearchProgress {
    pub run_id: Uuid,
    pub stage: String,
    pub message: String,
    pub source: Option<String>,
    pub query_id: Option<String>,
    pub records_collected: usize,
    pub error: Option<String>,
}

impl SearchProgress {
    fn new(run_id: Uuid, stage: &str, message: &str) -> Self {
        Self {
            run_id,
            stage: stage.to_string(),
            message: message.to_string(),
            source: None,
            query_id: None,
            records_collected: 0,
            error: None,
        }
    }
}

// ── Result summary ────────────────────────────────────────────────────────────

/// How one (source, query) pairing ended.
#[derive(Debug, Clone, Serialize)]
pub struct PairingOutcome {
    pub source: String,
    pub query_id: String,
    pub collected: usize,
    pub pages_fetched: usize,
    /// `None` when the pairing failed.
    pub stop: Option<StopReason>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub run_id: Uuid,
    pub raw_n: usize,
    pub filtered_n: usize,
    pub deduped_n: usize,
    pub pairings: Vec<PairingOutcome>,
    pub crawl_failures: Vec<CrawlFailure>,
    pub errors: Vec<String>,
    pub output_ris: PathBuf,
    pub output_csv: PathBuf,
    pub duration_ms: u64,
}

// ── Search ────────────────────────────────────────────────────────────────────

/// Run a full search with live sources.
pub async fn run_search(
    config: &SearchConfig,
    progress_tx: Option<broadcast::Sender<SearchProgress>>,
) -> anyhow::Result<SearchSummary> {
    config.validate()?;
    let sources = SearchSources::from_config(config)?;
    run_search_with(config, &sources, progress_tx).await
}

struct Run<'a> {
    config: &'a SearchConfig,
    log: EventLog,
    run_id: Uuid,
    progress_tx: Option<broadcast::Sender<SearchProgress>>,
    records: Vec<Record>,
    pairings: Vec<PairingOutcome>,
    errors: Vec<String>,
}

impl Run<'_> {
    fn emit(&self, progress: SearchProgress) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(progress);
        }
    }

    fn emit_pairing(&self, stage: &str, source: &str, query: &QuerySpec, collected: usize, error: Option<String>) {
        let mut p = SearchProgress::new(self.run_id, stage, &format!("{source}:{}", query.id));
        p.source = Some(source.to_string());
        p.query_id = Some(query.id.clone());
        p.records_collected = collected;
        p.error = error;
        self.emit(p);
    }

    /// Book-keeping shared by stopped and capped pairings.
    fn finish_pairing(
        &mut self,
        source: &str,
        query: &QuerySpec,
        outcome: anyhow::Result<Collection>,
    ) -> anyhow::Result<()> {
        match outcome {
            Ok(collection) => {
                match &collection.stop {
                    StopReason::Exhausted => self.log.append(Event::NoMoreResults {
                        source: source.to_string(),
                        query_id: query.id.clone(),
                    })?,
                    StopReason::EarlyStop { irrelevant_streak, collected } => {
                        self.log.append(Event::EarlyStopIrrelevantStreak {
                            source: source.to_string(),
                            query_id: query.id.clone(),
                            irrelevant_streak: *irrelevant_streak,
                            n_collected: *collected,
                        })?
                    }
                    _ => {}
                }

                let raw_path = self.config.raw_dir().join(format!("{source}_{}.jsonl", query.id));
                write_jsonl(&raw_path, &collection.records)?;
                info!(
                    source,
                    query_id = %query.id,
                    n = collection.records.len(),
                    stop = ?collection.stop,
                    "pairing complete"
                );
                self.emit_pairing("pairing_done", source, query, collection.records.len(), None);
                self.pairings.push(PairingOutcome {
                    source: source.to_string(),
                    query_id: query.id.clone(),
                    collected: collection.records.len(),
                    pages_fetched: collection.pages_fetched,
                    stop: Some(collection.stop),
                    error: None,
                });
                self.records.extend(collection.records);
            }
            Err(e) => {
                let msg = format!("{e:#}");
                let failure = GreylitError::Adapter {
                    source_name: source.to_string(),
                    query_id: query.id.clone(),
                    message: msg.clone(),
                };
                warn!(error = %failure, "pairing failed");
                self.log.append(Event::SourceFailed {
                    source: source.to_string(),
                    query_id: query.id.clone(),
                    error: msg.clone(),
                })?;
                self.emit_pairing("pairing_failed", source, query, 0, Some(msg.clone()));
                self.errors.push(failure.to_string());
                self.pairings.push(PairingOutcome {
                    source: source.to_string(),
                    query_id: query.id.clone(),
                    collected: 0,
                    pages_fetched: 0,
                    stop: None,
                    error: Some(msg),
                });
            }
        }
        Ok(())
    }

    fn start_pairing(&self, source: &str, query: &QuerySpec) -> anyhow::Result<()> {
        self.log.append(Event::Start {
            source: source.to_string(),
            query_id: Some(query.id.clone()),
            query: Some(query.text.clone()),
            seed_sites: Vec::new(),
        })?;
        self.emit_pairing("pairing_start", source, query, 0, None);
        Ok(())
    }
}

/// Run a full search against the given sources.
///
/// The pipeline is non-destructive: a failing pairing is logged and skipped.
/// Errors writing outputs or the event log abort the run.
#[instrument(skip_all, fields(queries = config.queries.len()))]
pub async fn run_search_with(
    config: &SearchConfig,
    sources: &SearchSources,
    progress_tx: Option<broadcast::Sender<SearchProgress>>,
) -> anyhow::Result<SearchSummary> {
    let t0 = std::time::Instant::now();
    let mut run = Run {
        config,
        log: EventLog::new(config.event_log_path()),
        run_id: Uuid::new_v4(),
        progress_tx,
        records: Vec::new(),
        pairings: Vec::new(),
        errors: Vec::new(),
    };
    info!(run_id = %run.run_id, "Starting search run");
    run.emit(SearchProgress::new(run.run_id, "search", "Searching sources"));

    // ── 1. API sources with stopping rules ──────────────────────────────────
    for query in &config.queries {
        for source in &sources.paged {
            run.start_pairing(source.name(), query)?;
            let outcome = collect(source.as_ref(), query, &config.stopping_rules, &config.ranking).await;
            run.finish_pairing(source.name(), query, outcome)?;
        }
    }

    // ── 2. Seed sites ───────────────────────────────────────────────────────
    let mut crawl_failures = Vec::new();
    if !config.seed_sites.is_empty() {
        let seed_source = IngestionSource::SeedSites.as_str();
        run.log.append(Event::Start {
            source: seed_source.to_string(),
            query_id: None,
            query: None,
            seed_sites: config.seed_sites.iter().map(|s| s.base_url.clone()).collect(),
        })?;
        run.emit(SearchProgress::new(run.run_id, "crawl", "Crawling seed sites"));

        let report = harvest_seed_sites(sources.crawler.as_ref(), &config.seed_sites, config.seed_max_pages).await;
        for failure in &report.failures {
            run.log.append(Event::CrawlPageFailed {
                url: failure.url.clone(),
                error: failure.error.clone(),
            })?;
        }
        write_jsonl(&config.raw_dir().join(format!("{seed_source}.jsonl")), &report.hits)?;
        info!(hits = report.hits.len(), failures = report.failures.len(), "Seed sites harvested");
        run.records.extend(report.hits);
        crawl_failures = report.failures;
    }

    // ── 3. Page-capped search engines ───────────────────────────────────────
    for query in &config.queries {
        for source in &sources.capped {
            run.start_pairing(source.name(), query)?;
            let rules = &config.stopping_rules;
            let outcome = collect_pages(source.as_ref(), query, rules.max_pages_google_like, rules.page_delay_ms).await;
            run.finish_pairing(source.name(), query, outcome)?;
        }
    }

    // ── 4-5. Score, filter, dedupe ──────────────────────────────────────────
    let mut all = std::mem::take(&mut run.records);
    let raw_n = all.len();
    annotate(&mut all, &config.ranking);
    let min = config.ranking.min_score_to_keep;
    let filtered: Vec<Record> = all
        .into_iter()
        .filter(|r| r.relevance_score.is_some_and(|s| s >= min))
        .collect();
    let filtered_n = filtered.len();
    let deduped = dedupe(filtered, &config.dedupe);
    run.emit(SearchProgress {
        records_collected: deduped.len(),
        ..SearchProgress::new(run.run_id, "dedupe", &format!("{raw_n} raw, {filtered_n} relevant, {} unique", deduped.len()))
    });

    // ── 6. Outputs ──────────────────────────────────────────────────────────
    let output_ris = config.processed_dir().join(DEDUPED_RIS);
    let output_csv = config.processed_dir().join(DEDUPED_CSV);
    write_ris(&output_ris, &deduped).context("writing RIS output")?;
    write_rows_csv(&output_csv, &records_to_rows(&deduped)).context("writing CSV output")?;

    run.log.append(Event::Complete {
        raw_n,
        filtered_n,
        deduped_n: deduped.len(),
        output_ris: output_ris.display().to_string(),
    })?;

    let summary = SearchSummary {
        run_id: run.run_id,
        raw_n,
        filtered_n,
        deduped_n: deduped.len(),
        pairings: run.pairings,
        crawl_failures,
        errors: run.errors,
        output_ris,
        output_csv,
        duration_ms: t0.elapsed().as_millis() as u64,
    };
    info!(
        raw = summary.raw_n,
        filtered = summary.filtered_n,
        deduped = summary.deduped_n,
        errors = summary.errors.len(),
        "Search run complete"
    );
    if let Some(ref tx) = run.progress_tx {
        let _ = tx.send(SearchProgress::new(summary.run_id, "complete", "Search run complete"));
    }
    Ok(summary)
}

// ── Offline steps ─────────────────────────────────────────────────────────────

/// Normalise RIS exports under `raw_root/<source>/` for each named source,
/// then the PubMed JSONL of a search run when `pubmed_raw` is given.
pub fn run_normalize(
    raw_root: &Path,
    out_dir: &Path,
    sources: &[String],
    pubmed_raw: Option<&Path>,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for source in sources {
        let dir = raw_root.join(source);
        let files = normalize_ris_dir(&dir, source, out_dir)
            .with_context(|| format!("normalising {}", dir.display()))?;
        written.extend(files);
    }
    if let Some(dir) = pubmed_raw {
        let pubmed = normalize_pubmed_jsonl(dir, out_dir)
            .with_context(|| format!("normalising PubMed records in {}", dir.display()))?;
        written.extend(pubmed);
    }
    Ok(written)
}

/// Reconcile every normalized CSV under `input_dir` into one CSV at `output`.
///
/// Files are read in sorted path order. Rows without a `source_file` get the
/// name of the file they came from. A previous `output` under `input_dir` is
/// skipped, however either path is spelled.
#[instrument(skip(tie_break))]
pub fn run_merge(input_dir: &Path, output: &Path, tie_break: &TieBreak) -> anyhow::Result<MergeStats> {
    // Canonical so `./dir/out.csv` and `dir/out.csv` are recognised as one file.
    let previous_output = std::fs::canonicalize(output).ok();
    let mut rows = Vec::new();
    for path in find_csv_files(input_dir)? {
        if previous_output.is_some() && std::fs::canonicalize(&path).ok() == previous_output {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_rows = read_rows_csv(&path).with_context(|| format!("reading {}", path.display()))?;
        rows.extend(file_rows.into_iter().map(|mut row| {
            if row.source_file.trim().is_empty() {
                row.source_file = file_name.clone();
            }
            row
        }));
    }

    let (merged, stats) = merge(rows, tie_break);
    write_rows_csv(output, &merged)?;
    info!(rows_in = stats.rows_in, rows_out = stats.rows_out, replaced = stats.replaced, "Merged normalized rows");
    Ok(stats)
}
