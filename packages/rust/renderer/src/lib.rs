//! Page rendering behind a handle-based interface.
//!
//! Callers acquire a [`PageId`] with [`PageRenderer::open_page`], navigate it,
//! read its HTML, and release it with [`PageRenderer::close_page`]. The
//! shipped [`HttpRenderer`] fetches pages over plain HTTP; it does not run
//! scripts.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

use deepdive_shared::{DeepDiveError, FetchConfig, Result};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; deepdive/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Redirect hops followed before a fetch is abandoned.
const MAX_REDIRECTS: usize = 5;

/// Opaque handle to an open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(u64);

impl PageId {
    /// Wrap a raw handle number. Renderers choose their own numbering.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PageRenderer trait
// ---------------------------------------------------------------------------

/// Source of rendered page HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Acquire a fresh page handle.
    async fn open_page(&self) -> Result<PageId>;

    /// Load `url` into the page.
    async fn navigate(&self, page: PageId, url: &str) -> Result<()>;

    /// HTML of the page's current document.
    async fn content(&self, page: PageId) -> Result<String>;

    /// Release the handle. Closing an unknown handle is a no-op.
    async fn close_page(&self, page: PageId) -> Result<()>;

    /// Release every open handle.
    async fn close_all(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HttpRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PageState {
    url: Option<String>,
    html: Option<String>,
}

/// Renderer that fetches documents with `reqwest`.
pub struct HttpRenderer {
    client: Client,
    timeout: Duration,
    pages: Mutex<HashMap<PageId, PageState>>,
    next_id: AtomicU64,
    /// Allow loopback/private targets (local servers, mock servers in tests).
    allow_private_hosts: bool,
}

impl HttpRenderer {
    /// Create a renderer using the `[fetch]` settings.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Self::build(
            Duration::from_secs(config.timeout_secs),
            config.allow_private_hosts,
        )
    }

    /// Allow fetching loopback/private hosts regardless of config.
    pub fn allow_private_hosts(self) -> Result<Self> {
        Self::build(self.timeout, true)
    }

    fn build(timeout: Duration, allow_private_hosts: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(allow_private_hosts))
            .timeout(timeout)
            .build()
            .map_err(|e| DeepDiveError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout,
            pages: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            allow_private_hosts,
        })
    }

    /// Number of handles currently open.
    pub async fn open_page_count(&self) -> usize {
        self.pages.lock().await.len()
    }

    async fn fetch(&self, url: &Url) -> Result<(String, String)> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| match std::error::Error::source(&e) {
                Some(cause) if e.is_redirect() => DeepDiveError::Render(format!("{url}: {cause}")),
                _ => DeepDiveError::Network(format!("{url}: {e}")),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeepDiveError::Render(format!("{url}: HTTP {status}")));
        }

        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_textual(ct) {
                return Err(DeepDiveError::Render(format!(
                    "{url}: unsupported content type {ct}"
                )));
            }
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| DeepDiveError::Network(format!("{url}: body read failed: {e}")))?;

        Ok((final_url, body))
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn open_page(&self) -> Result<PageId> {
        let id = PageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pages.lock().await.insert(id, PageState::default());
        debug!(page = %id, "page opened");
        Ok(id)
    }

    #[instrument(skip(self), fields(page = %page))]
    async fn navigate(&self, page: PageId, url: &str) -> Result<()> {
        if !self.pages.lock().await.contains_key(&page) {
            return Err(DeepDiveError::Render(format!("unknown page handle {page}")));
        }

        let parsed =
            Url::parse(url).map_err(|e| DeepDiveError::Render(format!("{url}: invalid URL: {e}")))?;
        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            return Err(DeepDiveError::Render(format!(
                "{url}: refusing to fetch private or non-HTTP target"
            )));
        }

        let (final_url, html) = self.fetch(&parsed).await?;
        debug!(final_url = %final_url, len = html.len(), "page loaded");

        // the handle may have been closed while the request was in flight
        let mut pages = self.pages.lock().await;
        let state = pages
            .get_mut(&page)
            .ok_or_else(|| DeepDiveError::Render(format!("page {page} closed during navigation")))?;
        state.url = Some(final_url);
        state.html = Some(html);
        Ok(())
    }

    async fn content(&self, page: PageId) -> Result<String> {
        let pages = self.pages.lock().await;
        let state = pages
            .get(&page)
            .ok_or_else(|| DeepDiveError::Render(format!("unknown page handle {page}")))?;
        state
            .html
            .clone()
            .ok_or_else(|| DeepDiveError::Render(format!("{page} has not been navigated")))
    }

    async fn close_page(&self, page: PageId) -> Result<()> {
        if let Some(state) = self.pages.lock().await.remove(&page) {
            debug!(page = %page, url = ?state.url, "page closed");
        }
        Ok(())
    }

    async fn close_all(&self) -> Result<()> {
        let mut pages = self.pages.lock().await;
        debug!(count = pages.len(), "closing all pages");
        pages.clear();
        Ok(())
    }
}

fn is_textual(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/xhtml+xml" || mime == "application/xml"
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Redirect policy that re-checks every hop against the SSRF rules.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous().len(), allow_private_hosts) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

/// Decide whether to follow a redirect to `target` after `hops` earlier URLs.
fn check_redirect(
    target: &Url,
    hops: usize,
    allow_private_hosts: bool,
) -> std::result::Result<(), String> {
    if hops > MAX_REDIRECTS {
        return Err(format!("too many redirects (limit {MAX_REDIRECTS})"));
    }
    if !allow_private_hosts && is_ssrf_target(target) {
        return Err(format!(
            "redirect to {target} refused: private or non-HTTP target"
        ));
    }
    Ok(())
}

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xC0) == 64)
                || (a == 192 && b == 0 && c == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
