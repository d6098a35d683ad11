//! Content extraction: HTML page → readable Markdown for fact extraction.
//!
//! Picks the main content container, converts it with `htmd`, then runs the
//! cleanup passes in [`cleanup`]. When conversion leaves nothing readable the
//! page's visible body text is used instead. Also extracts outbound links and
//! basic page metadata.

mod cleanup;

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use deepdive_shared::{DeepDiveError, Result};

/// Containers tried in order when looking for the main content.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    "#content",
    ".post-content",
    ".entry-content",
    ".article-body",
    ".content",
];

/// A container with less visible text than this is treated as a stub.
const MIN_CONTENT_CHARS: usize = 140;

/// Tags dropped entirely during conversion.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "header", "footer",
    "aside", "form", "button",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// An anchor found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub text: String,
    /// Absolute URL without fragment.
    pub href: String,
}

/// Basic document metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub author: String,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Convert a page to readable Markdown, truncated to `max_chars` characters.
///
/// Returns an empty string for pages with no readable text.
#[instrument(skip(html), fields(url = %url, html_len = html.len()))]
pub fn extract_markdown(html: &str, url: &str, max_chars: usize) -> Result<String> {
    let doc = Html::parse_document(html);
    let content_html = main_content_html(&doc);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let raw = converter
        .convert(&content_html)
        .map_err(|e| DeepDiveError::Conversion(format!("htmd conversion failed: {e}")))?;

    let base_url = Url::parse(url).ok();
    let mut text = cleanup::run_pipeline(&raw, base_url.as_ref());

    if text.trim().is_empty() {
        text = body_text(&doc);
        debug!(len = text.len(), "conversion empty, using body text");
    }

    let truncated = truncate_chars(&text, max_chars);
    debug!(
        chars = truncated.chars().count(),
        truncated = truncated.len() < text.len(),
        "extraction complete"
    );
    Ok(truncated.to_string())
}

/// All `http(s)` anchors on the page, resolved against `base_url`, deduplicated.
pub fn extract_links(html: &str, base_url: &str) -> Vec<PageLink> {
    static ANCHOR_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in doc.select(&ANCHOR_SEL) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => base.join(href),
            None => Url::parse(href),
        };
        let Ok(mut link) = resolved else {
            continue;
        };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        link.set_fragment(None);

        let href = link.to_string();
        if seen.insert(href.clone()) {
            links.push(PageLink {
                text: collapse_whitespace(&anchor.text().collect::<String>()),
                href,
            });
        }
    }

    links
}

/// Title, description and author from `<title>` and common meta tags.
pub fn extract_metadata(html: &str) -> PageMetadata {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("valid selector"));

    let doc = Html::parse_document(html);
    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    PageMetadata {
        title,
        description: first_meta(
            &doc,
            &["meta[name=\"description\"]", "meta[property=\"og:description\"]"],
        ),
        author: first_meta(
            &doc,
            &["meta[name=\"author\"]", "meta[property=\"article:author\"]"],
        ),
    }
}

/// Longest prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Inner HTML of the first content container with enough text, else `<body>`.
fn main_content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc
            .select(&selector)
            .find(|el| visible_text(el).chars().count() >= MIN_CONTENT_CHARS)
        {
            debug!(selector = sel_str, "content container found");
            return el.inner_html();
        }
    }

    body(doc)
        .map(|b| b.inner_html())
        .unwrap_or_else(|| doc.root_element().inner_html())
}

fn body(doc: &Html) -> Option<ElementRef<'_>> {
    static BODY_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("body").expect("valid selector"));
    doc.select(&BODY_SEL).next()
}

/// Visible text of the whole body, whitespace-collapsed.
fn body_text(doc: &Html) -> String {
    body(doc).map(|b| visible_text(&b)).unwrap_or_default()
}

/// Text nodes under `el`, skipping script-like containers.
fn visible_text(el: &ElementRef) -> String {
    let parts: Vec<&str> = el
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            let parent = parent.value().as_element()?;
            if matches!(parent.name(), "script" | "style" | "noscript" | "template") {
                return None;
            }
            let trimmed = text.trim();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .collect();
    collapse_whitespace(&parts.join(" "))
}

fn first_meta(doc: &Html, selectors: &[&str]) -> String {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| {
            doc.select(&sel)
                .filter_map(|m| m.value().attr("content"))
                .map(str::trim)
                .find(|c| !c.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r##"<html><head><title> Grid Batteries | Energy Weekly </title>
        <meta name="description" content="How utilities store power">
        <meta property="article:author" content="R. Okafor">
        </head><body>
        <nav><a href="/">Home</a><a href="/about">About</a></nav>
        <article>
          <h1>Grid-scale batteries</h1>
          <p>Lithium-ion batteries made up most of the new grid storage capacity installed in 2023,
             while pumped hydro still holds the majority of total installed storage worldwide.</p>
          <p>Read the <a href="/reports/storage-2024.pdf">full report</a> or jump to
             <a href="#costs">costs</a>.</p>
          <img src="/chart.png" alt="chart">
        </article>
        <footer>Copyright Energy Weekly</footer>
        <script>var tracking = true;</script>
        </body></html>"##;

    #[test]
    fn extract_markdown_prefers_article() {
        let md = extract_markdown(ARTICLE, "https://news.example.com/storage", 20_000).unwrap();
        assert!(md.contains("# Grid-scale batteries"));
        assert!(md.contains("pumped hydro"));
        assert!(md.contains("(https://news.example.com/reports/storage-2024.pdf)"));
        assert!(!md.contains("Copyright"));
        assert!(!md.contains("tracking"));
        assert!(!md.contains("chart.png"));
    }

    #[test]
    fn extract_markdown_skips_stub_containers() {
        let html = r#"<html><body><main><p>Loading</p></main>
            <div><h2>Flow batteries</h2><p>Vanadium flow batteries decouple power and energy capacity.</p></div>
            </body></html>"#;
        let md = extract_markdown(html, "https://example.com/", 20_000).unwrap();
        assert!(md.contains("Vanadium flow batteries"));
    }

    #[test]
    fn extract_markdown_falls_back_to_body_text() {
        let html = "<html><body><nav>Only navigation text here</nav></body></html>";
        let md = extract_markdown(html, "https://example.com/", 20_000).unwrap();
        assert_eq!(md, "Only navigation text here");
    }

    #[test]
    fn extract_markdown_empty_page_is_empty() {
        let md = extract_markdown("<html><body>  </body></html>", "https://example.com/", 100).unwrap();
        assert!(md.trim().is_empty());
    }

    #[test]
    fn extract_markdown_truncates_to_budget() {
        let body = "storage ".repeat(500);
        let html = format!("<html><body><p>{body}</p></body></html>");
        let md = extract_markdown(&html, "https://example.com/", 50).unwrap();
        assert_eq!(md.chars().count(), 50);
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn extract_links_resolves_and_dedupes() {
        let links = extract_links(ARTICLE, "https://news.example.com/storage");
        let hrefs: Vec<&str> = links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec![
                "https://news.example.com/",
                "https://news.example.com/about",
                "https://news.example.com/reports/storage-2024.pdf",
                "https://news.example.com/storage",
            ]
        );
        assert_eq!(links[2].text, "full report");
    }

    #[test]
    fn extract_links_ignores_non_http() {
        let html = r#"<a href="mailto:x@y.org">mail</a><a href="javascript:void(0)">js</a>"#;
        assert!(extract_links(html, "https://example.com/").is_empty());
    }

    #[test]
    fn extract_metadata_reads_title_and_meta() {
        let meta = extract_metadata(ARTICLE);
        assert_eq!(meta.title, "Grid Batteries | Energy Weekly");
        assert_eq!(meta.description, "How utilities store power");
        assert_eq!(meta.author, "R. Okafor");
    }

    #[test]
    fn extract_metadata_defaults_to_empty() {
        let meta = extract_metadata("<html><body>x</body></html>");
        assert_eq!(meta, PageMetadata::default());
    }
}
