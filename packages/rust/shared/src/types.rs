//! Core domain types for deepdive research sessions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeepDiveError, Result};

/// Current schema version for the persisted checkpoint record.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

/// Coarse effort knob controlling sub-question count, page budget and gap rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl Depth {
    /// Number of sub-questions the planner asks for.
    pub fn sub_question_count(self) -> usize {
        match self {
            Self::Quick => 3,
            Self::Standard => 5,
            Self::Deep => 8,
        }
    }

    /// Maximum number of pages visited by one extract pass.
    pub fn page_budget(self) -> usize {
        match self {
            Self::Quick => 5,
            Self::Standard => 10,
            Self::Deep => 20,
        }
    }

    /// Maximum number of gap-filling rounds.
    pub fn gap_round_limit(self) -> usize {
        match self {
            Self::Quick => 1,
            Self::Standard => 2,
            Self::Deep => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Deep => "deep",
        }
    }
}

impl std::fmt::Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Depth {
    type Err = DeepDiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            other => Err(DeepDiveError::validation(format!(
                "unknown depth '{other}': expected quick, standard or deep"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Canonical hyphenated UUID, case-insensitive.
static SESSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

/// A UUID wrapper identifying one research session.
///
/// Only constructible from a freshly generated UUID or a string in the strict
/// hyphenated form, so storage never sees a malformed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse and validate a session id supplied by a caller.
    pub fn parse(s: &str) -> Result<Self> {
        if !SESSION_ID_RE.is_match(s) {
            return Err(DeepDiveError::InvalidSessionId(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DeepDiveError::InvalidSessionId(s.to_string()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for SessionId {
    type Err = DeepDiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = DeepDiveError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Pipeline entities
// ---------------------------------------------------------------------------

/// One facet of the research topic, with the queries used to search for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub question: String,
    #[serde(rename = "searchQueries", alias = "search_queries", default)]
    pub search_queries: Vec<String>,
}

/// A single search result tagged with the sub-question that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Text of the originating sub-question (or gap query).
    pub question: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Facts extracted from one successfully processed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub url: String,
    pub title: String,
    pub facts: Vec<String>,
}
