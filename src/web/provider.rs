//! Pluggable live-web search and extraction providers.
//!
//! `"disabled"` is the default for both snippet search and extraction — the
//! web tier only activates when `[web] enabled = true` and a provider is
//! named in config. A sliding-window rate limiter guards outbound requests
//! per provider instance.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;

/// A single search-engine result before the page itself has been fetched.
#[derive(Debug, Clone)]
pub struct WebSnippet {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// The full extracted text of a fetched page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub text: String,
}

#[async_trait]
pub trait SnippetProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>>;
}

#[async_trait]
pub trait ExtractorProvider: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedPage>;
}

/// Sliding-window rate limiter shared by a provider's outbound calls.
pub struct RateLimiter {
    max_per_minute: u32,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `Ok(())` if the call is allowed to proceed, or an error
    /// naming the limit if the window is full.
    pub fn check(&self) -> Result<()> {
        let window = Duration::from_secs(60);
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() as u32 >= self.max_per_minute {
            bail!(
                "rate limit exceeded: {} requests/minute",
                self.max_per_minute
            );
        }
        timestamps.push_back(now);
        Ok(())
    }
}

/// Domain-based trust score. `.gov`/`.edu`/`.org` domains are treated as
/// more authoritative than the open web; everything else gets a neutral
/// baseline. This is a heuristic, not a verified credential — callers that
/// need hard guarantees should combine it with `web.min_trust_score`.
pub fn trust_score(url: &str) -> f64 {
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_lowercase();

    if host.ends_with(".gov") || host.ends_with(".edu") {
        0.9
    } else if host.ends_with(".org") {
        0.75
    } else {
        0.5
    }
}

/// No-op provider used when `web.enabled = false` or no provider is named.
pub struct DisabledSnippetProvider;

#[async_trait]
impl SnippetProvider for DisabledSnippetProvider {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
        bail!("web search is disabled")
    }
}

pub struct DisabledExtractorProvider;

#[async_trait]
impl ExtractorProvider for DisabledExtractorProvider {
    async fn extract(&self, _url: &str) -> Result<ExtractedPage> {
        bail!("web extraction is disabled")
    }
}

/// DuckDuckGo HTML search results, parsed with a lightweight tag scan
/// (no full HTML parser dependency is justified for one result format).
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl DuckDuckGoProvider {
    pub fn new(requests_per_minute: u32) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()?,
            limiter: RateLimiter::new(requests_per_minute),
        })
    }
}

#[async_trait]
impl SnippetProvider for DuckDuckGoProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        self.limiter.check()?;

        let resp = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("DuckDuckGo search returned status {}", resp.status());
        }

        let body = resp.text().await?;
        Ok(parse_duckduckgo_results(&body, max_results))
    }
}

fn parse_duckduckgo_results(html: &str, max_results: usize) -> Vec<WebSnippet> {
    let mut results = Vec::new();
    for block in html.split("result__a").skip(1) {
        if results.len() >= max_results {
            break;
        }
        let href = block
            .split("href=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap_or_default();
        let title = block
            .split('>')
            .nth(1)
            .and_then(|s| s.split('<').next())
            .unwrap_or_default()
            .trim();
        if href.is_empty() || title.is_empty() {
            continue;
        }
        results.push(WebSnippet {
            url: href.to_string(),
            title: title.to_string(),
            snippet: String::new(),
        });
    }
    results
}

/// Extracts readable body text from an arbitrary web page by stripping
/// script/style blocks and HTML tags. A full boilerplate-removal model
/// (e.g. Trafilatura's heuristics) would improve precision but isn't
/// justified while only plain extraction is needed.
pub struct HtmlTextExtractor {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl HtmlTextExtractor {
    pub fn new(requests_per_minute: u32) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()?,
            limiter: RateLimiter::new(requests_per_minute),
        })
    }
}

#[async_trait]
impl ExtractorProvider for HtmlTextExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedPage> {
        self.limiter.check()?;

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            bail!("fetch of {} returned status {}", url, resp.status());
        }
        let html = resp.text().await?;

        let title = extract_tag_text(&html, "title");
        let text = strip_html(&html);

        Ok(ExtractedPage {
            url: url.to_string(),
            title,
            author: None,
            published_at: None,
            text,
        })
    }
}

fn extract_tag_text(html: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = html.find(&open)?;
    let after_open = html[start..].find('>')? + start + 1;
    let end = html[after_open..].find(&close)? + after_open;
    let text = html[after_open..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_script_or_style = false;
    let lower = html.to_lowercase();

    let mut i = 0;
    let bytes = html.as_bytes();
    while i < bytes.len() {
        if lower[i..].starts_with("<script") || lower[i..].starts_with("<style") {
            in_script_or_style = true;
        }
        if in_script_or_style && (lower[i..].starts_with("</script>") || lower[i..].starts_with("</style>"))
        {
            in_script_or_style = false;
        }

        match bytes[i] as char {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !in_script_or_style => out.push(c),
            _ => {}
        }
        i += 1;
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_score_gov() {
        assert_eq!(trust_score("https://cdc.gov/page"), 0.9);
    }

    #[test]
    fn test_trust_score_org() {
        assert_eq!(trust_score("https://wikipedia.org/page"), 0.75);
    }

    #[test]
    fn test_trust_score_default() {
        assert_eq!(trust_score("https://example.com/page"), 0.5);
    }

    #[test]
    fn test_rate_limiter_allows_under_limit() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_strip_html_removes_script() {
        let html = "<html><head><script>alert(1)</script></head><body>Hello <b>World</b></body></html>";
        let text = strip_html(html);
        assert!(!text.contains("alert"));
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
    }

    #[test]
    fn test_extract_tag_text() {
        let html = "<html><head><title>My Page</title></head></html>";
        assert_eq!(extract_tag_text(html, "title"), Some("My Page".to_string()));
    }
}
