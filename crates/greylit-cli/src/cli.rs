//! CLI command definitions and argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// greylit - Grey-literature acquisition for systematic reviews.
#[derive(Debug, Parser)]
#[command(name = "greylit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every configured source, score, deduplicate and write RIS + CSV
    Search(SearchArgs),

    /// Check a configuration file without fetching anything
    Validate(SearchArgs),

    /// Convert RIS database exports and PubMed search output into normalized CSV rows
    Normalize(NormalizeArgs),

    /// Reconcile every normalized CSV into one deduplicated CSV
    Merge(MergeArgs),
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Configuration file (YAML, TOML or JSON); defaults to $GREYLIT_CONFIG or greylit.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Directory holding one sub-directory of `.ris` files per source
    #[arg(long, default_value = "data/raw")]
    pub raw: PathBuf,

    /// Output directory; CSVs land in `<out>/<source>/`
    #[arg(long, default_value = "data/normalized")]
    pub out: PathBuf,

    /// Source databases to normalise
    #[arg(long = "source", default_values_t = [String::from("cinahl"), String::from("wos")])]
    pub sources: Vec<String>,

    /// Raw output of a search run; its `pubmed_*.jsonl` files become `<out>/pubmed.csv`
    #[arg(long, default_value = "outputs/raw")]
    pub pubmed_raw: PathBuf,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Directory searched recursively for normalized CSVs
    #[arg(long, default_value = "data/normalized")]
    pub input: PathBuf,

    /// Merged CSV path
    #[arg(long, default_value = "data/normalized/merged_deduped.csv")]
    pub output: PathBuf,

    /// On equal quality, let rows from this query label replace...
    #[arg(long, requires = "over")]
    pub prefer_label: Option<String>,

    /// ...rows labeled only with this one
    #[arg(long, requires = "prefer_label")]
    pub over: Option<String>,
}
