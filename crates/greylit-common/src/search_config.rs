//! Run configuration for a grey-literature search.
//!
//! Loaded from `greylit.yaml` (or the path in `GREYLIT_CONFIG`); TOML and
//! JSON are accepted as well. Every section has serde defaults so a minimal
//! file only needs `queries` and `ranking`.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{GreylitError, Result};

pub const CONFIG_ENV_VAR: &str = "GREYLIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "greylit.yaml";

/// Complete configuration for one acquisition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub project: ProjectConfig,

    /// Queries are run in order against every enabled source.
    #[serde(default)]
    pub queries: Vec<QuerySpec>,

    #[serde(default)]
    pub stopping_rules: StopConfig,

    #[serde(default)]
    pub ranking: ScoringConfig,

    #[serde(default)]
    pub dedupe: DedupeConfig,

    #[serde(default)]
    pub sources: SourceToggles,

    #[serde(default)]
    pub seed_sites: Vec<SeedSite>,

    #[serde(default = "default_seed_max_pages")]
    pub seed_max_pages: usize,

    #[serde(default)]
    pub serpapi: SerpApiConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            queries: vec![],
            stopping_rules: StopConfig::default(),
            ranking: ScoringConfig::default(),
            dedupe: DedupeConfig::default(),
            sources: SourceToggles::default(),
            seed_sites: vec![],
            seed_max_pages: default_seed_max_pages(),
            serpapi: SerpApiConfig::default(),
        }
    }
}

// ── Project ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_out_dir() -> PathBuf { PathBuf::from("outputs") }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { out_dir: default_out_dir(), log_dir: default_log_dir() }
    }
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// A search query; `id` tags the provenance of every record it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub id: String,
    pub text: String,
}

impl QuerySpec {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

// ── Stopping rules ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// Hard cap on records kept per (source, query) pairing.
    #[serde(default = "default_n_max")]
    pub n_max_per_query: usize,

    /// Records collected before the irrelevance streak is tracked.
    #[serde(default = "default_warmup")]
    pub warmup_n: usize,

    /// Consecutive irrelevant records (past warmup) that end a pairing.
    #[serde(default = "default_zero_streak")]
    pub zero_hit_streak_stop: usize,

    /// Page cap for search-engine scraping, which has no early stop.
    #[serde(default = "default_max_pages_google_like")]
    pub max_pages_google_like: usize,

    /// Courtesy pause between page requests within one pairing.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

fn default_n_max() -> usize { 2000 }
fn default_warmup() -> usize { 200 }
fn default_zero_streak() -> usize { 150 }
fn default_max_pages_google_like() -> usize { 10 }
fn default_page_delay_ms() -> u64 { 200 }

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            n_max_per_query: default_n_max(),
            warmup_n: default_warmup(),
            zero_hit_streak_stop: default_zero_streak(),
            max_pages_google_like: default_max_pages_google_like(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

// ── Ranking ───────────────────────────────────────────────────────────────────

/// Keyword scoring: +1 per include term present, -2 per exclude term.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub include_terms: Vec<String>,
    #[serde(default)]
    pub exclude_terms: Vec<String>,
    #[serde(default)]
    pub min_score_to_keep: i32,
}

// ── Dedupe ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    #[serde(default = "default_true")]
    pub use_doi: bool,
    #[serde(default = "default_true")]
    pub use_pmid: bool,
    /// Token-set similarity (0-100) at or above which unkeyed titles collapse.
    #[serde(default = "default_fuzzy_threshold")]
    pub title_fuzzy_threshold: u8,
}

fn default_true() -> bool { true }
fn default_fuzzy_threshold() -> u8 { 92 }

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            use_doi: true,
            use_pmid: true,
            title_fuzzy_threshold: default_fuzzy_threshold(),
        }
    }
}

// ── Sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceToggles {
    #[serde(default = "default_true")]
    pub openalex: bool,
    #[serde(default = "default_true")]
    pub clinicaltrials: bool,
    #[serde(default)]
    pub pubmed: bool,

    /// Contact address sent to OpenAlex's polite pool.
    #[serde(default)]
    pub openalex_mailto: Option<String>,
    #[serde(default = "default_openalex_per_page")]
    pub openalex_per_page: usize,

    #[serde(default = "default_pubmed_page_size")]
    pub pubmed_page_size: usize,
    /// Env var holding an optional NCBI API key.
    #[serde(default = "default_pubmed_key_env")]
    pub pubmed_api_key_env: String,
}

fn default_openalex_per_page() -> usize { 200 }
fn default_pubmed_page_size() -> usize { 200 }
fn default_pubmed_key_env() -> String { "NCBI_API_KEY".to_string() }

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            openalex: true,
            clinicaltrials: true,
            pubmed: false,
            openalex_mailto: None,
            openalex_per_page: default_openalex_per_page(),
            pubmed_page_size: default_pubmed_page_size(),
            pubmed_api_key_env: default_pubmed_key_env(),
        }
    }
}

/// A site crawled breadth-first from `base_url`, staying within `allow_domains`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSite {
    pub base_url: String,
    #[serde(default)]
    pub allow_domains: Vec<String>,
}

fn default_seed_max_pages() -> usize { 80 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_serpapi_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_serpapi_engines")]
    pub engines: Vec<String>,
}

fn default_serpapi_key_env() -> String { "SERPAPI_API_KEY".to_string() }
fn default_serpapi_engines() -> Vec<String> {
    vec!["google".to_string(), "google_scholar".to_string()]
}

impl Default for SerpApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_env: default_serpapi_key_env(),
            engines: default_serpapi_engines(),
        }
    }
}

// ── Loading & validation ─────────────────────────────────────────────────────

impl SearchConfig {
    /// Load from `GREYLIT_CONFIG` or `greylit.yaml`, picking the format by extension.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(&path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GreylitError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(path),
            Some("json") => Self::from_json(path),
            _ => Self::from_yaml(path),
        }
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(GreylitError::Config("no queries configured".into()));
        }
        let mut ids = HashSet::new();
        for q in &self.queries {
            if q.id.trim().is_empty() || q.text.trim().is_empty() {
                return Err(GreylitError::Config(format!(
                    "query '{}' needs both an id and a text",
                    q.id
                )));
            }
            if q.id.contains('|') {
                return Err(GreylitError::Config(format!(
                    "query id '{}' must not contain '|'",
                    q.id
                )));
            }
            if !ids.insert(q.id.as_str()) {
                return Err(GreylitError::Config(format!("duplicate query id '{}'", q.id)));
            }
        }
        if self.stopping_rules.n_max_per_query == 0 {
            return Err(GreylitError::Config("n_max_per_query must be > 0".into()));
        }
        if self.stopping_rules.zero_hit_streak_stop == 0 {
            return Err(GreylitError::Config("zero_hit_streak_stop must be > 0".into()));
        }
        if self.dedupe.title_fuzzy_threshold > 100 {
            return Err(GreylitError::Config(format!(
                "title_fuzzy_threshold must be within 0-100, got {}",
                self.dedupe.title_fuzzy_threshold
            )));
        }
        if self.serpapi.enabled && self.serpapi.engines.is_empty() {
            return Err(GreylitError::Config("serpapi enabled without engines".into()));
        }
        Ok(())
    }

    /// SerpAPI key from the configured env var; `None` when SerpAPI is disabled.
    pub fn resolve_serpapi_key(&self) -> Result<Option<SecretString>> {
        if !self.serpapi.enabled {
            return Ok(None);
        }
        let key = std::env::var(&self.serpapi.api_key_env).unwrap_or_default();
        if key.trim().is_empty() {
            return Err(GreylitError::Config(format!(
                "SERP API enabled but env var {} is empty.",
                self.serpapi.api_key_env
            )));
        }
        Ok(Some(SecretString::from(key)))
    }

    /// Optional NCBI key; PubMed works without one at a lower rate limit.
    pub fn resolve_pubmed_key(&self) -> Option<SecretString> {
        std::env::var(&self.sources.pubmed_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
    }

    pub fn raw_dir(&self) -> PathBuf { self.project.out_dir.join("raw") }
    pub fn processed_dir(&self) -> PathBuf { self.project.out_dir.join("processed") }
    pub fn event_log_path(&self) -> PathBuf { self.project.log_dir.join("search_log.jsonl") }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
queries:
  - id: A
    text: cardiac arrest survivors quality of life
ranking:
  include_terms: ["cardiac arrest", "quality of life"]
  exclude_terms: ["mice"]
  min_score_to_keep: 1
"#;

    fn minimal() -> SearchConfig {
        serde_yaml::from_str(MINIMAL_YAML).unwrap()
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = minimal();
        assert_eq!(config.queries.len(), 1);
        assert_eq!(config.stopping_rules.n_max_per_query, 2000);
        assert_eq!(config.stopping_rules.page_delay_ms, 200);
        assert!(config.dedupe.use_doi);
        assert!(config.sources.openalex);
        assert!(!config.sources.pubmed);
        assert!(!config.serpapi.enabled);
        assert_eq!(config.seed_max_pages, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_equivalent() {
        let toml_src = r#"
[[queries]]
id = "A"
text = "cardiac arrest"

[ranking]
include_terms = ["cardiac arrest"]
min_score_to_keep = 1

[dedupe]
title_fuzzy_threshold = 90
"#;
        let config: SearchConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.dedupe.title_fuzzy_threshold, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_queries() {
        let config = SearchConfig::default();
        assert!(matches!(config.validate(), Err(GreylitError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_query_ids() {
        let mut config = minimal();
        config.queries.push(QuerySpec::new("A", "again"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate query id"));
    }

    #[test]
    fn test_validate_rejects_threshold_over_100() {
        let mut config = minimal();
        config.dedupe.title_fuzzy_threshold = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_streak() {
        let mut config = minimal();
        config.stopping_rules.zero_hit_streak_stop = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serpapi_key_missing_is_config_error() {
        let mut config = minimal();
        config.serpapi.enabled = true;
        config.serpapi.api_key_env = "GREYLIT_TEST_UNSET_SERPAPI_KEY".to_string();
        let err = config.resolve_serpapi_key().unwrap_err();
        assert!(err.to_string().contains("GREYLIT_TEST_UNSET_SERPAPI_KEY"));
    }

    #[test]
    fn test_serpapi_disabled_needs_no_key() {
        let config = minimal();
        assert!(config.resolve_serpapi_key().unwrap().is_none());
    }

    #[test]
    fn test_output_paths() {
        let config = minimal();
        assert_eq!(config.raw_dir(), PathBuf::from("outputs/raw"));
        assert_eq!(config.event_log_path(), PathBuf::from("logs/search_log.jsonl"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SearchConfig::from_path("/nonexistent/greylit.yaml").unwrap_err();
        assert!(matches!(err, GreylitError::Config(_)));
    }
}
