//! Bing backend.

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use deepdive_shared::{DeepDiveError, Result};

use crate::{SearchProvider, SearchResult, collapse_whitespace, fetch_results_page, finish};

const DEFAULT_BASE_URL: &str = "https://www.bing.com";

pub struct BingSearch {
    client: Client,
    base_url: String,
}

impl BingSearch {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for BingSearch {
    fn name(&self) -> &'static str {
        "bing"
    }

    #[instrument(skip(self), fields(engine = "bing"))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let url = Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[("q", query), ("count", limit.to_string().as_str())],
        )
        .map_err(|e| DeepDiveError::Search(format!("bad search URL: {e}")))?;

        let body = fetch_results_page(&self.client, &url, "bing").await?;
        let results = finish(parse_results(&body), limit);
        debug!(count = results.len(), "search complete");
        Ok(results)
    }
}

fn parse_results(html: &str) -> Vec<SearchResult> {
    static ROW_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("#b_results .b_algo").expect("valid selector"));
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("h2 a").expect("valid selector"));
    static SNIPPET_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".b_caption p").expect("valid selector"));
    static CAPTION_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".b_caption").expect("valid selector"));

    let doc = Html::parse_document(html);
    doc.select(&ROW_SEL)
        .filter_map(|row| {
            let link = row.select(&LINK_SEL).next()?;
            let href = link.value().attr("href").unwrap_or_default();
            let snippet = row
                .select(&SNIPPET_SEL)
                .next()
                .or_else(|| row.select(&CAPTION_SEL).next())
                .map(|s| collapse_whitespace(&s.text().collect::<String>()))
                .unwrap_or_default();
            Some(SearchResult {
                title: collapse_whitespace(&link.text().collect::<String>()),
                url: decode_bing_url(href),
                snippet,
            })
        })
        .collect()
}

/// Decode a Bing click-tracking URL (`/ck/a?...&u=a1<base64url>`) to its
/// destination. Anything that does not decode to an `http` URL is returned
/// unchanged.
pub fn decode_bing_url(href: &str) -> String {
    let Ok(url) = Url::parse(href) else {
        return href.to_string();
    };
    let Some(encoded) = url
        .query_pairs()
        .find(|(k, _)| k == "u")
        .map(|(_, v)| v.into_owned())
    else {
        return href.to_string();
    };

    let payload = encoded.strip_prefix("a1").unwrap_or(&encoded);
    let payload = payload.trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    match decoded {
        Some(target) if target.starts_with("http") => target,
        _ => href.to_string(),
    }
}
