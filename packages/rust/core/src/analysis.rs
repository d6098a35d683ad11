//! Cross-Reference Analyzer.

use tracing::{info, instrument};

use deepdive_shared::{Finding, Result};

use crate::completion::CompletionProvider;
use crate::prompts;

/// Ask the model where the findings agree, conflict, or leave gaps.
///
/// The reply is returned verbatim; nothing downstream parses it.
#[instrument(skip_all, fields(findings = findings.len()))]
pub async fn cross_reference(
    completion: &dyn CompletionProvider,
    topic: &str,
    findings: &[Finding],
) -> Result<String> {
    let reply = completion
        .complete(
            prompts::ANALYZE_SYSTEM,
            &prompts::analyze_user(topic, findings),
        )
        .await?;
    info!(chars = reply.content.len(), "analysis complete");
    Ok(reply.content)
}
