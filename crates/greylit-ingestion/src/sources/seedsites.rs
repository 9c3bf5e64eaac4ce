//! Breadth-first crawl of curated grey-literature sites.
//!
//! Each seed site is crawled from its `base_url`, following only links whose
//! host ends with one of the site's `allow_domains` (the seed's own host when
//! none are configured), for at most `max_pages` successfully fetched pages.
//!
//! Two kinds of hit are recorded:
//!   - PDF documents (by content type or a `.pdf` URL), without a title
//!   - HTML pages whose URL or `<title>` reads like grey literature
//!
//! A page that fails to fetch does not stop the crawl; the failure is kept in
//! the [`CrawlReport`].

use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use greylit_common::{SandboxClient, SeedSite};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::models::{IngestionSource, Record};

const CRAWL_TIMEOUT_SECS: u64 = 20;
const CRAWL_USER_AGENT: &str = "Mozilla/5.0";

const GREY_KEYWORDS: [&str; 10] = [
    "guideline",
    "guidance",
    "toolkit",
    "report",
    "audit",
    "pathway",
    "follow-up",
    "survivor",
    "quality of life",
    "rehabilitation",
];

fn pdf_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.pdf(\?|$)").unwrap())
}

pub fn is_pdf(url: &str, content_type: &str) -> bool {
    content_type.contains("application/pdf") || pdf_url_regex().is_match(url)
}

pub fn looks_like_grey_page(url: &str, title: Option<&str>) -> bool {
    let text = format!("{} {}", url, title.unwrap_or_default()).to_lowercase();
    GREY_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Response of a single page fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: String,
    /// Not read for error statuses or PDFs.
    pub body: Option<String>,
}

/// Fetches crawl pages. Implemented over HTTP by [`HttpFetcher`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedPage>;
}

/// Sandboxed HTTP fetcher scoped to the configured seed sites.
pub struct HttpFetcher {
    client: SandboxClient,
}

impl HttpFetcher {
    pub fn for_sites(sites: &[SeedSite]) -> anyhow::Result<Self> {
        let mut client = SandboxClient::with_timeout(Duration::from_secs(CRAWL_TIMEOUT_SECS))?;
        for site in sites {
            for domain in allowed_domains(site) {
                client.allow_domain(&domain);
            }
        }
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedPage> {
        let resp = self.client
            .get(url)?
            .header(reqwest::header::USER_AGENT, CRAWL_USER_AGENT)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = if status >= 400 || is_pdf(url, &content_type) {
            None
        } else {
            Some(resp.text().await?)
        };
        Ok(FetchedPage { status, content_type, body })
    }
}

/// One page that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub hits: Vec<Record>,
    pub failures: Vec<CrawlFailure>,
    pub pages_fetched: usize,
}

impl CrawlReport {
    fn merge(&mut self, other: CrawlReport) {
        self.hits.extend(other.hits);
        self.failures.extend(other.failures);
        self.pages_fetched += other.pages_fetched;
    }
}

/// Host suffixes a site's crawl may follow.
fn allowed_domains(site: &SeedSite) -> Vec<String> {
    let configured: Vec<String> = site
        .allow_domains
        .iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    if !configured.is_empty() {
        return configured;
    }
    Url::parse(&site.base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .into_iter()
        .collect()
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_default()
}

/// `<title>` text and absolute http(s) links of an HTML page.
fn parse_html(body: &str, page_url: &Url) -> (Option<String>, Vec<String>) {
    let document = Html::parse_document(body);
    let title_selector = Selector::parse("title").unwrap();
    let link_selector = Selector::parse("a[href]").unwrap();

    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string());

    let links = document
        .select(&link_selector)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .filter_map(|href| page_url.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
        .collect();

    (title, links)
}

fn hit(url: &str, title: Option<String>, kind: &str) -> Record {
    let mut r = Record {
        title,
        url: Some(url.to_string()),
        ..Default::default()
    };
    r.set_extra("type", json!(kind));
    r.set_extra("host", json!(host_of(url)));
    r
}

/// Crawl one seed site.
#[instrument(skip(fetcher, site), fields(base_url = %site.base_url))]
pub async fn crawl_site(fetcher: &dyn PageFetcher, site: &SeedSite, max_pages: usize) -> CrawlReport {
    let allow = allowed_domains(site);
    let mut report = CrawlReport::default();
    let mut queue: VecDeque<String> = VecDeque::from([site.base_url.clone()]);
    let mut seen: HashSet<String> = HashSet::new();

    while report.pages_fetched < max_pages {
        let Some(url) = queue.pop_front() else { break };
        if !seen.insert(url.clone()) {
            continue;
        }

        let page = match fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(%url, error = %e, "crawl page failed");
                report.failures.push(CrawlFailure { url, error: format!("{e:#}") });
                continue;
            }
        };
        if page.status >= 400 {
            debug!(%url, status = page.status, "skipping error page");
            continue;
        }
        report.pages_fetched += 1;

        if is_pdf(&url, &page.content_type) {
            report.hits.push(hit(&url, None, "pdf"));
            continue;
        }

        let Ok(page_url) = Url::parse(&url) else { continue };
        let (title, links) = parse_html(page.body.as_deref().unwrap_or_default(), &page_url);

        if looks_like_grey_page(&url, title.as_deref()) {
            report.hits.push(hit(&url, title, "page"));
        }

        for link in links {
            let host = host_of(&link).to_lowercase();
            if !allow.is_empty() && !allow.iter().any(|d| host.ends_with(d.as_str())) {
                continue;
            }
            if !seen.contains(&link) {
                queue.push_back(link);
            }
        }
    }

    info!(
        pages = report.pages_fetched,
        hits = report.hits.len(),
        failures = report.failures.len(),
        "seed site crawled"
    );
    report
}

/// Crawl every seed site in order; hits are tagged with the `seed_sites` source.
pub async fn harvest_seed_sites(fetcher: &dyn PageFetcher, sites: &[SeedSite], max_pages: usize) -> CrawlReport {
    let mut report = CrawlReport::default();
    for site in sites {
        report.merge(crawl_site(fetcher, site, max_pages).await);
    }
    for r in &mut report.hits {
        r.source = Some(IngestionSource::SeedSites.as_str().to_string());
    }
    report
}
