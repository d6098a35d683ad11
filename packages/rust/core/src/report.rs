//! Report Synthesizer.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use deepdive_shared::{Finding, Result};

use crate::completion::CompletionProvider;
use crate::prompts;

static SOURCES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s{0,3}#{1,6}\s+(?:sources|references)\b").expect("valid regex")
});

/// Write the final report from the analysis and every finding.
///
/// The result always ends up with a sources section: when the model leaves
/// it out, one is appended from `findings`.
#[instrument(skip_all, fields(findings = findings.len()))]
pub async fn synthesize(
    completion: &dyn CompletionProvider,
    topic: &str,
    analysis: &str,
    findings: &[Finding],
) -> Result<String> {
    let reply = completion
        .complete(
            prompts::REPORT_SYSTEM,
            &prompts::report_user(topic, analysis, findings),
        )
        .await?;
    let report = ensure_sources_section(reply.content, findings);
    info!(chars = report.len(), "report synthesized");
    Ok(report)
}

/// Append a numbered link list unless `report` already has a "Sources" or
/// "References" heading.
pub fn ensure_sources_section(mut report: String, findings: &[Finding]) -> String {
    if SOURCES_HEADING.is_match(&report) {
        return report;
    }
    debug!("report has no sources heading, appending one");

    report.push_str("\n\n## Sources\n\n");
    let entries: Vec<String> = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let label = if f.title.trim().is_empty() {
                f.url.as_str()
            } else {
                f.title.trim()
            };
            format!("[{}] [{label}]({})", i + 1, f.url)
        })
        .collect();
    report.push_str(&entries.join("\n\n"));
    report
}
