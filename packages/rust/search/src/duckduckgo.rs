//! DuckDuckGo backend using the script-free HTML endpoint.

use std::sync::LazyLock;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use deepdive_shared::{DeepDiveError, Result};

use crate::{SearchProvider, SearchResult, collapse_whitespace, fetch_results_page, finish};

const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com";

pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
}

impl DuckDuckGoSearch {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    /// Point at a different host (mock servers in tests).
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    #[instrument(skip(self), fields(engine = "duckduckgo"))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let url = Url::parse_with_params(&format!("{}/html/", self.base_url), &[("q", query)])
            .map_err(|e| DeepDiveError::Search(format!("bad search URL: {e}")))?;

        let body = fetch_results_page(&self.client, &url, "duckduckgo").await?;
        let results = finish(parse_results(&body), limit);
        debug!(count = results.len(), "search complete");
        Ok(results)
    }
}

/// Parse organic results from the HTML endpoint, skipping ads.
fn parse_results(html: &str) -> Vec<SearchResult> {
    static RESULT_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".result:not(.result--ad)").expect("valid selector"));
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a.result__a").expect("valid selector"));
    static SNIPPET_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".result__snippet").expect("valid selector"));

    let doc = Html::parse_document(html);
    doc.select(&RESULT_SEL)
        .filter_map(|row| {
            let link = row.select(&LINK_SEL).next()?;
            let href = link.value().attr("href")?;
            Some(SearchResult {
                title: collapse_whitespace(&link.text().collect::<String>()),
                url: decode_redirect(href).unwrap_or_default(),
                snippet: row
                    .select(&SNIPPET_SEL)
                    .next()
                    .map(|s| collapse_whitespace(&s.text().collect::<String>()))
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Resolve `//duckduckgo.com/l/?uddg=<encoded>` redirect links to their target.
fn decode_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    if url.path() == "/l/" {
        let target = url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?;
        return target.starts_with("http").then_some(target);
    }
    matches!(url.scheme(), "http" | "https").then_some(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_PAGE: &str = r#"<html><body><div id="links">
      <div class="result results_links result--ad">
        <h2 class="result__title"><a class="result__a" href="https://ads.example.com/buy">Buy batteries</a></h2>
      </div>
      <div class="result results_links">
        <h2 class="result__title">
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.energy.gov%2Feere%2Fgrid-storage&amp;rut=abc">Grid   Energy Storage</a>
        </h2>
        <a class="result__snippet">Energy storage helps <b>balance</b> supply and demand.</a>
      </div>
      <div class="result results_links">
        <h2 class="result__title"><a class="result__a" href="https://en.wikipedia.org/wiki/Grid_energy_storage">Grid energy storage - Wikipedia</a></h2>
      </div>
      <div class="result results_links">
        <h2 class="result__title"><a class="result__a" href="javascript:void(0)">Broken</a></h2>
      </div>
    </div></body></html>"#;

    #[test]
    fn parse_results_skips_ads_and_decodes_redirects() {
        let results = finish(parse_results(RESULTS_PAGE), 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Grid Energy Storage");
        assert_eq!(results[0].url, "https://www.energy.gov/eere/grid-storage");
        assert_eq!(
            results[0].snippet,
            "Energy storage helps balance supply and demand."
        );
        assert_eq!(results[1].url, "https://en.wikipedia.org/wiki/Grid_energy_storage");
        assert_eq!(results[1].snippet, "");
    }

    #[test]
    fn decode_redirect_rejects_non_http_targets() {
        assert_eq!(decode_redirect("//duckduckgo.com/l/?uddg=javascript%3Aalert(1)"), None);
        assert_eq!(decode_redirect("javascript:void(0)"), None);
    }

    #[tokio::test]
    async fn search_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "grid storage"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
            .mount(&server)
            .await;

        let engine = DuckDuckGoSearch::with_base_url(Client::new(), server.uri());
        let results = engine.search("grid storage", 1).await.expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.energy.gov/eere/grid-storage");
    }

    #[tokio::test]
    async fn search_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let engine = DuckDuckGoSearch::with_base_url(Client::new(), server.uri());
        let err = engine.search("anything", 5).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
