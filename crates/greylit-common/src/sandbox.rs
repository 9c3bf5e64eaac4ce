use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::GreylitError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("greylit/", env!("CARGO_PKG_VERSION"), " (research)");

/// An HTTP client that only allows requests to approved domains.
///
/// Every source adapter goes through this client, so a misconfigured seed site
/// or a redirect-built URL can never reach a host outside the run's scope.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist of bibliographic and trial registry APIs.
    pub fn new() -> Result<Self, GreylitError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, GreylitError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "api.openalex.org",        // OpenAlex
            "clinicaltrials.gov",      // ClinicalTrials.gov v2
            "eutils.ncbi.nlm.nih.gov", // PubMed
            "serpapi.com",             // SerpAPI
        ];
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GreylitError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Appends a hostname to the allowlist; subdomains are allowed too.
    pub fn allow_domain(&mut self, domain: &str) {
        let domain = domain.trim().trim_start_matches('.').to_lowercase();
        if !domain.is_empty() {
            self.allowlist.insert(domain);
        }
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.allowlist
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, GreylitError> {
        if !self.is_allowed(url) {
            return Err(GreylitError::Security(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allowlist() {
        let client = SandboxClient::new().unwrap();
        assert!(client.is_allowed("https://api.openalex.org/works?search=x"));
        assert!(client.is_allowed("https://clinicaltrials.gov/api/v2/studies"));
        assert!(!client.is_allowed("https://example.org/"));
    }

    #[test]
    fn test_subdomain_of_allowed_domain() {
        let mut client = SandboxClient::new().unwrap();
        client.allow_domain("resus.org.uk");
        assert!(client.is_allowed("https://www.resus.org.uk/library"));
        assert!(!client.is_allowed("https://notresus.org.uk/"));
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        let mut client = SandboxClient::new().unwrap();
        client.allow_domain("example.org");
        assert!(!client.is_allowed("ftp://example.org/file.pdf"));
        assert!(!client.is_allowed("mailto:someone@example.org"));
    }

    #[test]
    fn test_get_outside_allowlist_is_security_error() {
        let client = SandboxClient::new().unwrap();
        let err = client.get("https://evil.example.com/").unwrap_err();
        assert!(matches!(err, GreylitError::Security(_)));
    }
}
