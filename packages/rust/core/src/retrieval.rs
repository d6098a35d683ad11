//! Retrieval Stage: search phase and extract phase.
//!
//! The search phase turns sub-questions into tagged search hits. The extract
//! phase visits pages, reduces them to readable text, and asks the model for
//! the facts each page holds. Both phases run strictly one call at a time and
//! treat a failing query or page as a skipped iteration, reported in the
//! batch counts.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use deepdive_artifacts::ArtifactWriter;
use deepdive_markdown::{extract_markdown, truncate_chars};
use deepdive_renderer::PageRenderer;
use deepdive_search::SearchProvider;
use deepdive_shared::{Finding, ResearchConfig, Result, SearchHit, SessionId, SubQuestion};

use crate::completion::CompletionProvider;
use crate::parse::{Structured, parse_structured};
use crate::prompts;

// ---------------------------------------------------------------------------
// Search phase
// ---------------------------------------------------------------------------

/// Hits gathered for a set of sub-questions.
#[derive(Debug, Clone, Default)]
pub struct SearchBatch {
    pub hits: Vec<SearchHit>,
    /// Queries issued.
    pub queries: usize,
    /// Queries that returned an error.
    pub failed: usize,
}

impl SearchBatch {
    /// True when queries were issued and every one of them failed.
    pub fn all_failed(&self) -> bool {
        self.queries > 0 && self.failed == self.queries
    }
}

/// Run every query of every sub-question, tagging hits with the question.
#[instrument(skip_all, fields(sub_questions = sub_questions.len(), per_query))]
pub async fn search_sub_questions(
    search: &dyn SearchProvider,
    sub_questions: &[SubQuestion],
    per_query: usize,
) -> SearchBatch {
    let mut batch = SearchBatch::default();

    for sq in sub_questions {
        for query in &sq.search_queries {
            batch.queries += 1;
            match search.search(query, per_query).await {
                Ok(results) => {
                    debug!(query = %query, count = results.len(), "query answered");
                    batch
                        .hits
                        .extend(results.into_iter().map(|r| SearchHit {
                            question: sq.question.clone(),
                            title: r.title,
                            url: r.url,
                            snippet: r.snippet,
                        }));
                }
                Err(e) => {
                    batch.failed += 1;
                    warn!(query = %query, error = %e, "search query failed");
                }
            }
        }
    }

    info!(
        hits = batch.hits.len(),
        queries = batch.queries,
        failed = batch.failed,
        "search phase complete"
    );
    batch
}

// ---------------------------------------------------------------------------
// Extract phase
// ---------------------------------------------------------------------------

/// Findings gathered from one batch of pages.
#[derive(Debug, Clone, Default)]
pub struct ExtractBatch {
    pub findings: Vec<Finding>,
    /// Pages fetched (or attempted).
    pub attempted: usize,
    /// Pages whose render, conversion or fact extraction errored.
    pub failed: usize,
    /// Pages with no readable text.
    pub empty: usize,
}

impl ExtractBatch {
    /// True when pages were attempted and every one of them errored.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }
}

/// Visits pages and extracts facts from them.
pub struct Extractor<'a> {
    completion: &'a dyn CompletionProvider,
    renderer: &'a dyn PageRenderer,
    max_page_chars: usize,
    fallback_fact_chars: usize,
    archive: Option<(&'a ArtifactWriter, SessionId)>,
}

impl<'a> Extractor<'a> {
    pub fn new(
        completion: &'a dyn CompletionProvider,
        renderer: &'a dyn PageRenderer,
        config: &ResearchConfig,
    ) -> Self {
        Self {
            completion,
            renderer,
            max_page_chars: config.max_page_chars,
            fallback_fact_chars: config.fallback_fact_chars,
            archive: None,
        }
    }

    /// Also save each page's extracted text under the session's artifact dir.
    pub fn with_archive(mut self, writer: &'a ArtifactWriter, session_id: SessionId) -> Self {
        self.archive = Some((writer, session_id));
        self
    }

    /// Visit up to `budget` distinct hit URLs, skipping any already in
    /// `visited`, and extract findings from them.
    ///
    /// Every attempted URL is added to `visited`, whether or not it yielded
    /// a finding.
    #[instrument(skip_all, fields(hits = hits.len(), budget))]
    pub async fn extract(
        &self,
        hits: &[SearchHit],
        budget: usize,
        visited: &mut BTreeSet<String>,
    ) -> ExtractBatch {
        let mut seen = HashSet::new();
        let to_visit: Vec<&SearchHit> = hits
            .iter()
            .filter(|h| seen.insert(h.url.as_str()))
            .take(budget)
            .collect();

        let mut batch = ExtractBatch::default();
        for hit in to_visit {
            if !visited.insert(hit.url.clone()) {
                debug!(url = %hit.url, "already visited, skipping");
                continue;
            }
            batch.attempted += 1;

            match self.process(hit).await {
                Ok(Some(finding)) => batch.findings.push(finding),
                Ok(None) => {
                    batch.empty += 1;
                    debug!(url = %hit.url, "no readable content, skipping");
                }
                Err(e) => {
                    batch.failed += 1;
                    warn!(url = %hit.url, error = %e, "page extraction failed");
                }
            }
        }

        info!(
            findings = batch.findings.len(),
            attempted = batch.attempted,
            failed = batch.failed,
            empty = batch.empty,
            "extract phase complete"
        );
        batch
    }

    /// Render, convert and extract one page. `Ok(None)` for an empty page.
    async fn process(&self, hit: &SearchHit) -> Result<Option<Finding>> {
        let html = self.fetch_html(&hit.url).await?;
        let text = extract_markdown(&html, &hit.url, self.max_page_chars)?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let reply = self
            .completion
            .complete(prompts::EXTRACT_SYSTEM, &prompts::extract_user(hit, &text))
            .await?;

        let facts = match parse_structured::<Vec<String>>(&reply.content) {
            Structured::Parsed(facts) if !facts.is_empty() => facts,
            _ => {
                let prefix = truncate_chars(reply.content.trim(), self.fallback_fact_chars);
                if prefix.is_empty() {
                    debug!(url = %hit.url, "blank fact reply, skipping page");
                    return Ok(None);
                }
                debug!(url = %hit.url, "fact list unstructured, keeping reply prefix");
                vec![prefix.to_string()]
            }
        };

        if let Some((writer, session_id)) = self.archive {
            if let Err(e) = writer.write_source(&session_id, &hit.url, &hit.title, &text, Utc::now())
            {
                warn!(url = %hit.url, error = %e, "failed to archive source");
            }
        }

        Ok(Some(Finding {
            url: hit.url.clone(),
            title: hit.title.clone(),
            facts,
        }))
    }

    /// Fetch a page's HTML through a fresh handle, releasing it on every path.
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let page = self.renderer.open_page().await?;
        let result = async {
            self.renderer.navigate(page, url).await?;
            self.renderer.content(page).await
        }
        .await;

        if let Err(e) = self.renderer.close_page(page).await {
            warn!(page = %page, error = %e, "failed to close page");
        }
        result
    }
}
