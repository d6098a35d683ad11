//! Structured reading of free-text model replies.
//!
//! Models are asked for JSON but may wrap it in a code fence, add prose, or
//! ignore the instruction. [`parse_structured`] never fails: it yields either
//! the parsed value or the raw reply, and each call site decides what the
//! fallback means.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Outcome of reading a model reply as `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structured<T> {
    Parsed(T),
    /// The reply, unchanged, when it was not valid `T`.
    Fallback(String),
}

/// Parse `raw` as JSON of type `T`, looking inside the first fenced code
/// block if there is one.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Structured<T> {
    match serde_json::from_str(strip_code_fence(raw)) {
        Ok(value) => Structured::Parsed(value),
        Err(e) => {
            tracing::debug!(error = %e, reply_len = raw.len(), "reply is not structured");
            Structured::Fallback(raw.to_string())
        }
    }
}

/// Contents of the first ```` ``` ```` / ```` ```json ```` block, else the
/// whole text, trimmed.
fn strip_code_fence(raw: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex"));

    FENCE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str())
        .trim()
}
