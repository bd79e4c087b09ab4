//! Web search collaborators

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = concat!("sleuth/", env!("CARGO_PKG_VERSION"));

static RESULT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a([^>]*class="result__a"[^>]*)>(.*?)</a>"#).unwrap());
static RESULT_SNIPPET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).unwrap());
static HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// One structured search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// What a search produced
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Structured(Vec<SearchHit>),
    /// Unstructured text, including failure descriptions
    Raw(String),
}

impl SearchOutcome {
    /// Render as research content: one block per hit separated by `---`
    pub fn render(&self) -> String {
        match self {
            SearchOutcome::Structured(hits) if hits.is_empty() => "No search results found.".to_string(),
            SearchOutcome::Structured(hits) => hits
                .iter()
                .map(|hit| {
                    let title = if hit.title.is_empty() {
                        if hit.url.is_empty() { "Untitled" } else { hit.url.as_str() }
                    } else {
                        hit.title.as_str()
                    };
                    format!("**{}**\n{}\nSource: {}\n", title, hit.content, hit.url)
                })
                .collect::<Vec<_>>()
                .join("\n---\n"),
            SearchOutcome::Raw(text) => text.clone(),
        }
    }
}

/// A search backend. Never fails; problems are reported as [`SearchOutcome::Raw`].
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(&self, query: &str) -> SearchOutcome;
}

/// Tavily web search
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: u32,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: TAVILY_ENDPOINT.to_string(),
            max_results: 3,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request(&self, query: &str) -> reqwest::Result<Vec<SearchHit>> {
        let body = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: TavilyResponse = response.json().await?;
        Ok(parsed.results)
    }
}

#[async_trait]
impl Search for TavilySearch {
    async fn search(&self, query: &str) -> SearchOutcome {
        match self.request(query).await {
            Ok(hits) => {
                tracing::debug!(query, hits = hits.len(), "Search finished");
                SearchOutcome::Structured(hits)
            }
            Err(e) => {
                tracing::warn!(query, "Search failed: {}", e);
                SearchOutcome::Raw(format!("Search failed: {}", e))
            }
        }
    }
}

/// Keyless web search over DuckDuckGo's HTML results page
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DUCKDUCKGO_ENDPOINT.to_string(),
            max_results: 3,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request(&self, query: &str) -> reqwest::Result<String> {
        self.client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Extract result hits from a DuckDuckGo HTML results page, skipping ads
fn parse_duckduckgo(html: &str, max_results: usize) -> Vec<SearchHit> {
    let links: Vec<_> = RESULT_LINK.captures_iter(html).collect();
    let snippets: Vec<_> = RESULT_SNIPPET.captures_iter(html).collect();
    let mut hits = Vec::new();

    for (i, link) in links.iter().enumerate() {
        let (Some(whole), Some(attrs), Some(title)) = (link.get(0), link.get(1), link.get(2)) else {
            continue;
        };
        let Some(href) = HREF.captures(attrs.as_str()).and_then(|c| c.get(1)) else {
            continue;
        };
        let url = result_url(&decode_entities(href.as_str()));
        if url.is_empty() || url.contains("duckduckgo.com/y.js") {
            continue;
        }

        // The snippet belongs to this link if it appears before the next one
        let next_start = links
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let content = snippets
            .iter()
            .filter_map(|c| c.get(1))
            .find(|m| m.start() > whole.end() && m.start() < next_start)
            .map(|m| plain_text(m.as_str()))
            .unwrap_or_default();

        hits.push(SearchHit {
            title: plain_text(title.as_str()),
            url,
            content,
        });
        if hits.len() == max_results {
            break;
        }
    }
    hits
}

/// Resolve DuckDuckGo's redirect links to the target URL
fn result_url(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    match reqwest::Url::parse(&absolute) {
        Ok(url) if url.path().starts_with("/l/") => url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned())
            .unwrap_or(absolute),
        Ok(_) => absolute,
        Err(_) => String::new(),
    }
}

fn plain_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, "");
    decode_entities(stripped.trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[async_trait]
impl Search for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> SearchOutcome {
        match self.request(query).await {
            Ok(html) => {
                let hits = parse_duckduckgo(&html, self.max_results);
                tracing::debug!(query, hits = hits.len(), "Search finished");
                SearchOutcome::Structured(hits)
            }
            Err(e) => {
                tracing::warn!(query, "Search error: {}", e);
                SearchOutcome::Raw(format!("Search error: {}", e))
            }
        }
    }
}
