//! Query Planner: topic → sub-questions with search queries.

use tracing::{info, instrument, warn};

use deepdive_shared::{Depth, Result, SubQuestion};

use crate::completion::CompletionProvider;
use crate::parse::{Structured, parse_structured};
use crate::prompts;

/// Ask the model for `depth.sub_question_count()` sub-questions.
///
/// An unstructured or empty reply yields a single sub-question equal to the
/// topic. Only a failed completion call is an error.
#[instrument(skip_all, fields(depth = %depth))]
pub async fn plan(
    completion: &dyn CompletionProvider,
    topic: &str,
    depth: Depth,
) -> Result<Vec<SubQuestion>> {
    let count = depth.sub_question_count();
    let reply = completion
        .complete(&prompts::plan_system(count), &prompts::plan_user(topic))
        .await?;

    let planned = match parse_structured::<Vec<SubQuestion>>(&reply.content) {
        Structured::Parsed(entries) => normalize(entries),
        Structured::Fallback(_) => Vec::new(),
    };

    if planned.is_empty() {
        warn!("planner reply unusable, falling back to the topic itself");
        return Ok(vec![fallback(topic)]);
    }

    info!(requested = count, planned = planned.len(), "topic decomposed");
    Ok(planned)
}

fn fallback(topic: &str) -> SubQuestion {
    SubQuestion {
        question: topic.to_string(),
        search_queries: vec![topic.to_string()],
    }
}

/// Drop entries without a question; give query-less entries their question
/// as the query.
fn normalize(entries: Vec<SubQuestion>) -> Vec<SubQuestion> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let question = entry.question.trim().to_string();
            if question.is_empty() {
                return None;
            }
            let mut search_queries: Vec<String> = entry
                .search_queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            if search_queries.is_empty() {
                search_queries.push(question.clone());
            }
            Some(SubQuestion {
                question,
                search_queries,
            })
        })
        .collect()
}
