//! Gap-Filling Loop.
//!
//! Each round asks the model which gaps remain in the analysis, searches for
//! them, and extracts findings from URLs the session has not visited yet.
//! The loop runs at most `depth.gap_round_limit()` rounds and ends early when
//! the model names no gaps or the searches turn up nothing new.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use deepdive_search::SearchProvider;
use deepdive_shared::{Depth, Finding, SearchHit};

use crate::completion::CompletionProvider;
use crate::parse::{Structured, parse_structured};
use crate::prompts;
use crate::retrieval::Extractor;

/// Page budget for each gap round, whatever the session depth.
const GAP_ROUND_BUDGET: Depth = Depth::Quick;

/// Result of the loop.
#[derive(Debug, Clone, Default)]
pub struct GapFill {
    /// The initial findings followed by every round's new findings.
    pub findings: Vec<Finding>,
    /// Rounds started.
    pub rounds: usize,
}

/// Runs gap rounds against one session's state.
pub struct GapFiller<'a> {
    completion: &'a dyn CompletionProvider,
    search: &'a dyn SearchProvider,
    extractor: &'a Extractor<'a>,
    results_per_query: usize,
}

impl<'a> GapFiller<'a> {
    pub fn new(
        completion: &'a dyn CompletionProvider,
        search: &'a dyn SearchProvider,
        extractor: &'a Extractor<'a>,
        results_per_query: usize,
    ) -> Self {
        Self {
            completion,
            search,
            extractor,
            results_per_query,
        }
    }

    /// Run the loop. Never fails: a round whose model call errors is skipped.
    #[instrument(skip_all, fields(depth = %depth, initial = findings.len()))]
    pub async fn fill(
        &self,
        topic: &str,
        analysis: &str,
        findings: &[Finding],
        depth: Depth,
        visited: &mut BTreeSet<String>,
    ) -> GapFill {
        let mut fill = GapFill {
            findings: findings.to_vec(),
            rounds: 0,
        };
        let max_rounds = depth.gap_round_limit();

        while fill.rounds < max_rounds {
            fill.rounds += 1;
            debug!(round = fill.rounds, max_rounds, "gap round");

            let reply = match self
                .completion
                .complete(
                    prompts::GAP_SYSTEM,
                    &prompts::gap_user(topic, analysis, fill.findings.len()),
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(round = fill.rounds, error = %e, "gap query generation failed");
                    continue;
                }
            };

            let queries = match parse_structured::<Vec<String>>(&reply.content) {
                Structured::Parsed(queries) => queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect::<Vec<_>>(),
                Structured::Fallback(_) => Vec::new(),
            };
            if queries.is_empty() {
                info!(round = fill.rounds, "no gaps identified, stopping");
                break;
            }

            let hits = self.search_unvisited(&queries, visited).await;
            if hits.is_empty() {
                info!(round = fill.rounds, "no new URLs from gap search, stopping");
                break;
            }

            let batch = self
                .extractor
                .extract(&hits, GAP_ROUND_BUDGET.page_budget(), visited)
                .await;
            info!(
                round = fill.rounds,
                new_findings = batch.findings.len(),
                "gap round complete"
            );
            fill.findings.extend(batch.findings);
        }

        fill
    }

    /// Search each query, keeping hits whose URL has not been visited. Hits
    /// are tagged with the query that found them.
    async fn search_unvisited(
        &self,
        queries: &[String],
        visited: &BTreeSet<String>,
    ) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        for query in queries {
            match self.search.search(query, self.results_per_query).await {
                Ok(results) => hits.extend(
                    results
                        .into_iter()
                        .filter(|r| !visited.contains(&r.url))
                        .map(|r| SearchHit {
                            question: query.clone(),
                            title: r.title,
                            url: r.url,
                            snippet: r.snippet,
                        }),
                ),
                Err(e) => warn!(query = %query, error = %e, "gap search failed"),
            }
        }
        hits
    }
}
