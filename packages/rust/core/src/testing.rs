//! In-memory collaborators for pipeline tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use deepdive_renderer::{PageId, PageRenderer};
use deepdive_search::{SearchProvider, SearchResult};
use deepdive_shared::{DeepDiveError, Result};

use crate::completion::{Completion, CompletionProvider};

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum CallKind {
    Plan,
    Extract,
    Analyze,
    Gap,
    Report,
}

impl CallKind {
    fn of(system: &str) -> Self {
        if system.contains("research planner") {
            Self::Plan
        } else if system.contains("extract facts") {
            Self::Extract
        } else if system.contains("research analyst") {
            Self::Analyze
        } else if system.contains("1-3 web search queries") {
            Self::Gap
        } else {
            Self::Report
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub kind: CallKind,
    pub system: String,
    pub user: String,
}

enum Reply {
    Text(String),
    Fail,
}

/// Completion fake that answers by prompt kind. Queued replies are used
/// first; afterwards each kind has a fixed default.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    queued: Mutex<HashMap<CallKind, VecDeque<Reply>>>,
    failing_extract_urls: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, kind: CallKind, reply: Reply) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn planner(self, reply: &str) -> Self {
        self.push(CallKind::Plan, Reply::Text(reply.into()))
    }

    pub fn failing_planner(self) -> Self {
        self.push(CallKind::Plan, Reply::Fail)
    }

    pub fn extract_reply(self, reply: &str) -> Self {
        self.push(CallKind::Extract, Reply::Text(reply.into()))
    }

    pub fn failing_extract_for(self, url: &str) -> Self {
        self.failing_extract_urls
            .lock()
            .unwrap()
            .insert(url.to_string());
        self
    }

    pub fn failing_analysis(self) -> Self {
        self.push(CallKind::Analyze, Reply::Fail)
    }

    pub fn gap_reply(self, reply: &str) -> Self {
        self.push(CallKind::Gap, Reply::Text(reply.into()))
    }

    pub fn failing_gap(self) -> Self {
        self.push(CallKind::Gap, Reply::Fail)
    }

    pub fn report(self, reply: &str) -> Self {
        self.push(CallKind::Report, Reply::Text(reply.into()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    fn default_reply(kind: CallKind, user: &str) -> String {
        match kind {
            CallKind::Plan | CallKind::Gap => "[]".into(),
            CallKind::Extract => {
                let url = page_url(user).unwrap_or("unknown");
                format!("[\"Fact from {url}\"]")
            }
            CallKind::Analyze => "Sources [1] and [2] agree on costs.".into(),
            CallKind::Report => "# Report\n\nStorage is growing fast [1].".into(),
        }
    }
}

fn page_url(user: &str) -> Option<&str> {
    user.lines().find_map(|l| l.strip_prefix("URL: "))
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        let kind = CallKind::of(system);
        self.calls.lock().unwrap().push(Call {
            kind,
            system: system.to_string(),
            user: user.to_string(),
        });

        if kind == CallKind::Extract {
            if let Some(url) = page_url(user) {
                if self.failing_extract_urls.lock().unwrap().contains(url) {
                    return Err(DeepDiveError::Completion(format!("scripted failure for {url}")));
                }
            }
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        let content = match queued {
            Some(Reply::Text(text)) => text,
            Some(Reply::Fail) => {
                return Err(DeepDiveError::Completion(format!("scripted {kind:?} failure")));
            }
            None => Self::default_reply(kind, user),
        };

        Ok(Completion {
            content,
            model: "scripted".into(),
            usage: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Search fake. Unscripted queries get `limit` synthetic results under
/// `https://example.com/<query-slug>/<n>`.
#[derive(Default)]
pub(crate) struct FakeSearch {
    scripted: Mutex<HashMap<String, Vec<SearchResult>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(self, query: &str, urls: &[&str]) -> Self {
        let results = urls
            .iter()
            .map(|u| SearchResult {
                title: format!("Page at {u}"),
                url: (*u).to_string(),
                snippet: String::new(),
            })
            .collect();
        self.scripted
            .lock()
            .unwrap()
            .insert(query.to_string(), results);
        self
    }

    pub fn failing(self, query: &str) -> Self {
        self.failing.lock().unwrap().insert(query.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn synthetic_url(query: &str, n: usize) -> String {
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("https://example.com/{slug}/{n}")
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.calls.lock().unwrap().push((query.to_string(), limit));
        if self.failing.lock().unwrap().contains(query) {
            return Err(DeepDiveError::Search(format!("scripted failure for {query}")));
        }
        if let Some(results) = self.scripted.lock().unwrap().get(query) {
            return Ok(results.iter().take(limit).cloned().collect());
        }
        Ok((1..=limit)
            .map(|n| SearchResult {
                title: format!("{query} result {n}"),
                url: Self::synthetic_url(query, n),
                snippet: format!("snippet {n}"),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer fake serving a fixed article for every URL.
#[derive(Default)]
pub(crate) struct FakeRenderer {
    next_id: Mutex<u64>,
    open: Mutex<HashMap<PageId, Option<String>>>,
    navigations: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    blank: Mutex<HashSet<String>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, url: &str) -> Self {
        self.failing.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn blank(self, url: &str) -> Self {
        self.blank.lock().unwrap().insert(url.to_string());
        self
    }

    /// Every URL navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn open_page(&self) -> Result<PageId> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = PageId::new(*next);
        self.open.lock().unwrap().insert(id, None);
        Ok(id)
    }

    async fn navigate(&self, page: PageId, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(DeepDiveError::Render(format!("{url}: scripted failure")));
        }
        let mut open = self.open.lock().unwrap();
        let slot = open
            .get_mut(&page)
            .ok_or_else(|| DeepDiveError::Render(format!("unknown page handle {page}")))?;
        *slot = Some(url.to_string());
        Ok(())
    }

    async fn content(&self, page: PageId) -> Result<String> {
        let url = self
            .open
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .flatten()
            .ok_or_else(|| DeepDiveError::Render(format!("{page} has not been navigated")))?;
        if self.blank.lock().unwrap().contains(&url) {
            return Ok("<html><body>   </body></html>".into());
        }
        Ok(format!(
            "<html><head><title>{url}</title></head><body><article><h1>About {url}</h1>\
             <p>Grid-scale storage capacity keeps growing as battery prices fall and \
             utilities pair storage with solar and wind to shift energy into the evening peak.</p>\
             </article></body></html>"
        ))
    }

    async fn close_page(&self, page: PageId) -> Result<()> {
        self.open.lock().unwrap().remove(&page);
        Ok(())
    }

    async fn close_all(&self) -> Result<()> {
        self.open.lock().unwrap().clear();
        Ok(())
    }
}
