//! Prompt text for every model call in the pipeline.

use deepdive_shared::{Finding, SearchHit};

pub(crate) fn plan_system(count: usize) -> String {
    format!(
        "You are a research planner. Break the user's research topic into {count} focused \
sub-questions that together cover it thoroughly. Give each sub-question 1-2 web search queries.

Answer with JSON only, in this shape:
[
  {{ \"question\": \"...\", \"searchQueries\": [\"query 1\", \"query 2\"] }}
]"
    )
}

pub(crate) fn plan_user(topic: &str) -> String {
    format!("Research topic: {topic}")
}

pub(crate) const EXTRACT_SYSTEM: &str = "You extract facts from web pages. List the key facts \
in the page content that bear on the research question. Each fact must stand on its own.

Answer with JSON only, in this shape:
[\"fact 1\", \"fact 2\"]";

pub(crate) fn extract_user(hit: &SearchHit, content: &str) -> String {
    format!(
        "Research question: {}\n\nPage title: {}\nURL: {}\n\nContent:\n{content}",
        hit.question, hit.title, hit.url
    )
}

pub(crate) const ANALYZE_SYSTEM: &str = "You are a research analyst. Compare the numbered \
findings collected for the topic and report:
1. Where sources agree
2. Where sources conflict
3. Gaps that need more research

Cite sources by number, e.g. [1], [3].";

pub(crate) fn analyze_user(topic: &str, findings: &[Finding]) -> String {
    let listing = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "[{}] {} ({})\nFacts: {}",
                i + 1,
                f.title,
                f.url,
                f.facts.join("; ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Topic: {topic}\n\nFindings:\n{listing}")
}

pub(crate) const GAP_SYSTEM: &str = "You are a research assistant. From the analysis, pick the \
most important open gaps and write 1-3 web search queries that would close them. If nothing \
significant is missing, answer with an empty array.

Answer with JSON only, in this shape:
[\"query 1\", \"query 2\"]";

pub(crate) fn gap_user(topic: &str, analysis: &str, source_count: usize) -> String {
    format!("Topic: {topic}\n\nAnalysis:\n{analysis}\n\nSources so far: {source_count}")
}

pub(crate) const REPORT_SYSTEM: &str = "You write research reports. Using the findings and \
analysis provided, write a complete, well-organized report that:

1. Opens with an executive summary
2. Covers each major aspect of the topic in depth
3. Points out conflicting information and likely reasons for it
4. Cites sources inline by number, e.g. [1], [2]
5. Ends with a \"## Sources\" section listing every cited URL
6. Uses markdown

Stay objective and specific.";

pub(crate) fn report_user(topic: &str, analysis: &str, findings: &[Finding]) -> String {
    let sources = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "[{}] {}\n    URL: {}\n    Key facts: {}",
                i + 1,
                f.title,
                f.url,
                f.facts.join("; ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Topic: {topic}\n\nCross-reference analysis:\n{analysis}\n\nAll findings:\n{sources}")
}
