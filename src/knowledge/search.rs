//! HTTP search transport for the knowledge sub-agent, grounded on the
//! DuckDuckGo HTML endpoint: no API key, one GET request, regex-based
//! result extraction from the result list markup.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, CoreError>;
}

pub fn duckduckgo_search_url(query: &str) -> String {
    format!("https://html.duckduckgo.com/html/?q={}", urlencoding::encode(query))
}

/// DuckDuckGo wraps outbound links in a redirector
/// (`//duckduckgo.com/l/?uddg=<encoded>&...`); unwrap it to the real URL.
pub fn extract_actual_url(href: &str) -> String {
    if let Some(idx) = href.find("uddg=") {
        let rest = &href[idx + "uddg=".len()..];
        let end = rest.find('&').unwrap_or(rest.len());
        if let Ok(decoded) = urlencoding::decode(&rest[..end]) {
            return decoded.into_owned();
        }
    }
    href.to_string()
}

pub fn strip_html(fragment: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("valid regex");
    let without_tags = tag_re.replace_all(fragment, "");
    without_tags
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// Parses DuckDuckGo's HTML result list into [`SearchResult`]s. Each result
/// is a `result__body` block containing a `result__a` anchor (title + href)
/// and a `result__snippet` span.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let anchor_re = Regex::new(r#"<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).expect("valid regex");
    let snippet_re = Regex::new(r#"<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).expect("valid regex");

    // Split on each `result__body` block boundary rather than matching
    // balanced closing tags, since DuckDuckGo's markup nests divs to
    // variable depth.
    let mut results = Vec::new();
    for body in html.split("class=\"result__body\"").skip(1) {
        if results.len() >= max_results {
            break;
        }
        let Some(anchor) = anchor_re.captures(body) else { continue };
        let url = extract_actual_url(&anchor[1]);
        let title = strip_html(&anchor[2]);
        let snippet = snippet_re.captures(body).map(|c| strip_html(&c[1])).unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        results.push(SearchResult { title, snippet, url });
    }
    results
}

pub struct DuckDuckGoSearchClient {
    client: Client,
}

impl Default for DuckDuckGoSearchClient {
    fn default() -> Self {
        Self { client: Client::new() }
    }
}

impl DuckDuckGoSearchClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchClient for DuckDuckGoSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, CoreError> {
        let url = duckduckgo_search_url(query);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0 (compatible; agent-core/0.1)")
            .send()
            .await
            .map_err(|e| CoreError::Transport(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Transport(format!("search returned status {}", response.status())));
        }

        let html = response.text().await.map_err(|e| CoreError::Transport(format!("failed to read search body: {e}")))?;
        Ok(parse_results(&html, max_results))
    }
}
