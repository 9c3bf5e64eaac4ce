//! greylit — Grey-literature acquisition engine.
//! Entry point for the command-line binary.

mod cli;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use greylit_common::SearchConfig;
use greylit_ingestion::pipeline::{run_merge, run_normalize, run_search, SearchProgress};
use greylit_ingestion::reconcile::TieBreak;

use cli::{Cli, Command, MergeArgs, NormalizeArgs, SearchArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("greylit=debug,info")),
        )
        .init();

    info!("greylit {}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Command::Search(args) => search(args).await,
        Command::Validate(args) => validate(args),
        Command::Normalize(args) => normalize(args),
        Command::Merge(args) => merge(args),
    }
}

fn load_config(args: &SearchArgs) -> anyhow::Result<SearchConfig> {
    let config = match &args.config {
        Some(path) => SearchConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SearchConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn validate(args: SearchArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    config.resolve_serpapi_key()?;
    println!(
        "Configuration OK: {} queries, {} seed sites, SerpAPI {}",
        config.queries.len(),
        config.seed_sites.len(),
        if config.serpapi.enabled { "enabled" } else { "disabled" },
    );
    Ok(())
}

/// Spinner fed by pipeline progress events until the run completes.
fn spawn_progress(mut rx: broadcast::Receiver<SearchProgress>) -> tokio::task::JoinHandle<()> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(p) => {
                    let msg = match (&p.error, p.records_collected) {
                        (Some(err), _) => format!("{} failed: {}", p.message, err),
                        (None, 0) => p.message.clone(),
                        (None, n) => format!("{} ({} records)", p.message, n),
                    };
                    pb.set_message(msg);
                    if p.stage == "complete" {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        pb.finish_and_clear();
    })
}

async fn search(args: SearchArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let (tx, rx) = broadcast::channel(64);
    let progress = spawn_progress(rx);

    let result = run_search(&config, Some(tx)).await;
    let _ = progress.await;
    let summary = result?;

    for p in &summary.pairings {
        match (&p.stop, &p.error) {
            (Some(stop), _) => println!("  {:<24} {:<4} {:>6} records  {:?}", p.source, p.query_id, p.collected, stop),
            (None, Some(err)) => println!("  {:<24} {:<4} FAILED  {}", p.source, p.query_id, err),
            (None, None) => {}
        }
    }
    if !summary.crawl_failures.is_empty() {
        println!("  seed sites: {} pages could not be fetched", summary.crawl_failures.len());
    }
    println!(
        "Done. Raw={} Filtered={} Deduped={}",
        summary.raw_n, summary.filtered_n, summary.deduped_n
    );
    println!("Output: {}", summary.output_ris.display());
    println!("        {}", summary.output_csv.display());
    Ok(())
}

fn normalize(args: NormalizeArgs) -> anyhow::Result<()> {
    let written = run_normalize(&args.raw, &args.out, &args.sources, Some(args.pubmed_raw.as_path()))?;
    for path in &written {
        println!("  {}", path.display());
    }
    println!("Wrote {} normalized CSV files to: {}", written.len(), args.out.display());
    Ok(())
}

fn merge(args: MergeArgs) -> anyhow::Result<()> {
    let tie_break = match (&args.prefer_label, &args.over) {
        (Some(preferred), Some(over)) => TieBreak::prefer(preferred, over),
        _ => TieBreak::KeepFirst,
    };
    let stats = run_merge(&args.input, &args.output, &tie_break)?;
    println!(
        "Merged {} rows into {} ({} replaced on collision): {}",
        stats.rows_in,
        stats.rows_out,
        stats.replaced,
        args.output.display()
    );
    Ok(())
}
