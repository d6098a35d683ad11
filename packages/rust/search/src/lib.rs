//! Web search behind a provider trait.
//!
//! Two backends scrape public result pages: DuckDuckGo's HTML endpoint and
//! Bing. The backend is picked from `[search] engine` at construction time.

mod bing;
mod duckduckgo;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use deepdive_shared::{DeepDiveError, Result, SearchBackend, SearchConfig};

pub use bing::{BingSearch, decode_bing_url};
pub use duckduckgo::DuckDuckGoSearch;

/// User-Agent sent to result pages. Both engines serve a stripped page to
/// unknown agents.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// One organic result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Up to `limit` results for `query`, in engine order.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

/// Build the configured search backend.
pub fn build_search_provider(config: &SearchConfig) -> Result<Box<dyn SearchProvider>> {
    let client = http_client(config.timeout_secs)?;
    Ok(match config.engine {
        SearchBackend::Duckduckgo => Box::new(DuckDuckGoSearch::new(client)),
        SearchBackend::Bing => Box::new(BingSearch::new(client)),
    })
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DeepDiveError::Network(format!("failed to build HTTP client: {e}")))
}

/// GET a results page and return its body.
async fn fetch_results_page(client: &Client, url: &url::Url, engine: &str) -> Result<String> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| DeepDiveError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DeepDiveError::Search(format!(
            "{engine} returned HTTP {status}"
        )));
    }

    response
        .text()
        .await
        .map_err(|e| DeepDiveError::Network(format!("{url}: body read failed: {e}")))
}

/// Drop rows without a title or URL, then cap the count.
fn finish(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| !r.title.is_empty() && !r.url.is_empty())
        .take(limit)
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: url.into(),
            snippet: String::new(),
        }
    }

    #[test]
    fn finish_drops_incomplete_rows_and_caps() {
        let rows = vec![
            result("", "https://a.example"),
            result("B", ""),
            result("C", "https://c.example"),
            result("D", "https://d.example"),
            result("E", "https://e.example"),
        ];
        let kept = finish(rows, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "C");
        assert_eq!(kept[1].title, "D");
    }

    #[test]
    fn build_search_provider_respects_engine() {
        let mut config = SearchConfig::default();
        assert_eq!(build_search_provider(&config).unwrap().name(), "duckduckgo");
        config.engine = SearchBackend::Bing;
        assert_eq!(build_search_provider(&config).unwrap().name(), "bing");
    }
}
