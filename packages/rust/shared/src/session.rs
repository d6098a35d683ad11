//! Research session state and its persisted checkpoint form.
//!
//! In memory a session's progress is a [`Stage`]: each variant carries exactly
//! the outputs valid at that point of the pipeline. On disk it is flattened to
//! a [`CheckpointRecord`] with a `lastCompletedStep` counter and optional
//! payloads; converting back re-checks that every payload for a completed
//! step is present and no payload for a pending step is.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeepDiveError, Result};
use crate::types::{CURRENT_SCHEMA_VERSION, Depth, Finding, SearchHit, SessionId, SubQuestion};

/// Number of the last pipeline step that stores output.
pub const FINAL_STEP: u8 = 6;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline progress, one variant per completed step.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    New,
    Planned {
        sub_questions: Vec<SubQuestion>,
    },
    Searched {
        sub_questions: Vec<SubQuestion>,
        hits: Vec<SearchHit>,
    },
    Extracted {
        sub_questions: Vec<SubQuestion>,
        hits: Vec<SearchHit>,
        findings: Vec<Finding>,
    },
    Analyzed {
        sub_questions: Vec<SubQuestion>,
        hits: Vec<SearchHit>,
        findings: Vec<Finding>,
        analysis: String,
    },
    GapFilled {
        sub_questions: Vec<SubQuestion>,
        hits: Vec<SearchHit>,
        findings: Vec<Finding>,
        analysis: String,
        all_findings: Vec<Finding>,
    },
    Synthesized {
        sub_questions: Vec<SubQuestion>,
        hits: Vec<SearchHit>,
        findings: Vec<Finding>,
        analysis: String,
        all_findings: Vec<Finding>,
        report: String,
    },
}

/// Output of a single pipeline step, applied with [`Session::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Planned(Vec<SubQuestion>),
    Searched(Vec<SearchHit>),
    Extracted(Vec<Finding>),
    Analyzed(String),
    GapFilled(Vec<Finding>),
    Synthesized(String),
}

impl StepOutcome {
    /// Step number this outcome completes.
    pub fn step(&self) -> u8 {
        match self {
            Self::Planned(_) => 1,
            Self::Searched(_) => 2,
            Self::Extracted(_) => 3,
            Self::Analyzed(_) => 4,
            Self::GapFilled(_) => 5,
            Self::Synthesized(_) => 6,
        }
    }
}

impl Stage {
    /// Number of the last completed step (0 for a new session).
    pub fn last_completed_step(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Planned { .. } => 1,
            Self::Searched { .. } => 2,
            Self::Extracted { .. } => 3,
            Self::Analyzed { .. } => 4,
            Self::GapFilled { .. } => 5,
            Self::Synthesized { .. } => 6,
        }
    }

    pub fn sub_questions(&self) -> Option<&[SubQuestion]> {
        match self {
            Self::New => None,
            Self::Planned { sub_questions }
            | Self::Searched { sub_questions, .. }
            | Self::Extracted { sub_questions, .. }
            | Self::Analyzed { sub_questions, .. }
            | Self::GapFilled { sub_questions, .. }
            | Self::Synthesized { sub_questions, .. } => Some(sub_questions),
        }
    }

    pub fn hits(&self) -> Option<&[SearchHit]> {
        match self {
            Self::New | Self::Planned { .. } => None,
            Self::Searched { hits, .. }
            | Self::Extracted { hits, .. }
            | Self::Analyzed { hits, .. }
            | Self::GapFilled { hits, .. }
            | Self::Synthesized { hits, .. } => Some(hits),
        }
    }

    /// Findings from the initial extraction (step 3).
    pub fn findings(&self) -> Option<&[Finding]> {
        match self {
            Self::New | Self::Planned { .. } | Self::Searched { .. } => None,
            Self::Extracted { findings, .. }
            | Self::Analyzed { findings, .. }
            | Self::GapFilled { findings, .. }
            | Self::Synthesized { findings, .. } => Some(findings),
        }
    }

    pub fn analysis(&self) -> Option<&str> {
        match self {
            Self::Analyzed { analysis, .. }
            | Self::GapFilled { analysis, .. }
            | Self::Synthesized { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    /// Initial findings plus every gap round's findings (step 5).
    pub fn all_findings(&self) -> Option<&[Finding]> {
        match self {
            Self::GapFilled { all_findings, .. } | Self::Synthesized { all_findings, .. } => {
                Some(all_findings)
            }
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&str> {
        match self {
            Self::Synthesized { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Apply the next step's outcome. Gives both values back unchanged when
    /// the outcome is not the one that follows this stage.
    fn advance(self, outcome: StepOutcome) -> std::result::Result<Self, (Self, StepOutcome)> {
        match (self, outcome) {
            (Self::New, StepOutcome::Planned(sub_questions)) => Ok(Self::Planned { sub_questions }),
            (Self::Planned { sub_questions }, StepOutcome::Searched(hits)) => {
                Ok(Self::Searched {
                    sub_questions,
                    hits,
                })
            }
            (
                Self::Searched {
                    sub_questions,
                    hits,
                },
                StepOutcome::Extracted(findings),
            ) => Ok(Self::Extracted {
                sub_questions,
                hits,
                findings,
            }),
            (
                Self::Extracted {
                    sub_questions,
                    hits,
                    findings,
                },
                StepOutcome::Analyzed(analysis),
            ) => Ok(Self::Analyzed {
                sub_questions,
                hits,
                findings,
                analysis,
            }),
            (
                Self::Analyzed {
                    sub_questions,
                    hits,
                    findings,
                    analysis,
                },
                StepOutcome::GapFilled(all_findings),
            ) => Ok(Self::GapFilled {
                sub_questions,
                hits,
                findings,
                analysis,
                all_findings,
            }),
            (
                Self::GapFilled {
                    sub_questions,
                    hits,
                    findings,
                    analysis,
                    all_findings,
                },
                StepOutcome::Synthesized(report),
            ) => Ok(Self::Synthesized {
                sub_questions,
                hits,
                findings,
                analysis,
                all_findings,
                report,
            }),
            (stage, outcome) => Err((stage, outcome)),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One resumable research run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub topic: String,
    pub depth: Depth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Every URL fetched so far in this session. Only ever grows.
    pub visited_urls: BTreeSet<String>,
    pub stage: Stage,
}

impl Session {
    /// Start a fresh session at step 0.
    pub fn new(topic: impl Into<String>, depth: Depth) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            topic: topic.into(),
            depth,
            created_at: now,
            updated_at: now,
            visited_urls: BTreeSet::new(),
            stage: Stage::New,
        }
    }

    pub fn last_completed_step(&self) -> u8 {
        self.stage.last_completed_step()
    }

    pub fn is_complete(&self) -> bool {
        self.last_completed_step() >= FINAL_STEP
    }

    /// Record the output of the next step and merge the URLs it visited.
    ///
    /// Fails without touching the session if `outcome` is not the step
    /// directly after the current one.
    pub fn advance(
        &mut self,
        outcome: StepOutcome,
        visited: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let current = std::mem::replace(&mut self.stage, Stage::New);
        match current.advance(outcome) {
            Ok(next) => {
                self.stage = next;
                self.visited_urls.extend(visited);
                Ok(())
            }
            Err((stage, outcome)) => {
                let from = stage.last_completed_step();
                self.stage = stage;
                Err(DeepDiveError::validation(format!(
                    "cannot apply step {} output after step {from}",
                    outcome.step()
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointRecord
// ---------------------------------------------------------------------------

/// The persisted, self-describing form of a [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub version: u32,
    pub session_id: SessionId,
    pub topic: String,
    pub depth: Depth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_completed_step: u8,
    pub visited_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_questions: Option<Vec<SubQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchHit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<Finding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_findings: Option<Vec<Finding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

impl From<&Session> for CheckpointRecord {
    fn from(session: &Session) -> Self {
        let stage = &session.stage;
        Self {
            version: CURRENT_SCHEMA_VERSION,
            session_id: session.id,
            topic: session.topic.clone(),
            depth: session.depth,
            created_at: session.created_at,
            updated_at: session.updated_at,
            last_completed_step: stage.last_completed_step(),
            visited_urls: session.visited_urls.iter().cloned().collect(),
            sub_questions: stage.sub_questions().map(<[_]>::to_vec),
            search_results: stage.hits().map(<[_]>::to_vec),
            findings: stage.findings().map(<[_]>::to_vec),
            analysis: stage.analysis().map(str::to_string),
            all_findings: stage.all_findings().map(<[_]>::to_vec),
            report: stage.report().map(str::to_string),
        }
    }
}

impl TryFrom<CheckpointRecord> for Session {
    type Error = DeepDiveError;

    fn try_from(record: CheckpointRecord) -> Result<Self> {
        let step = record.last_completed_step;
        if step > FINAL_STEP {
            return Err(DeepDiveError::validation(format!(
                "lastCompletedStep {step} out of range"
            )));
        }

        let present = [
            record.sub_questions.is_some(),
            record.search_results.is_some(),
            record.findings.is_some(),
            record.analysis.is_some(),
            record.all_findings.is_some(),
            record.report.is_some(),
        ];
        for (i, has) in present.iter().enumerate() {
            let n = i as u8 + 1;
            if *has != (n <= step) {
                return Err(DeepDiveError::validation(format!(
                    "payload for step {n} inconsistent with lastCompletedStep {step}"
                )));
            }
        }

        let mut stage = Stage::New;
        let outcomes = [
            record.sub_questions.map(StepOutcome::Planned),
            record.search_results.map(StepOutcome::Searched),
            record.findings.map(StepOutcome::Extracted),
            record.analysis.map(StepOutcome::Analyzed),
            record.all_findings.map(StepOutcome::GapFilled),
            record.report.map(StepOutcome::Synthesized),
        ];
        for outcome in outcomes.into_iter().flatten() {
            stage = stage
                .advance(outcome)
                .map_err(|_| DeepDiveError::validation("checkpoint payloads out of order"))?;
        }

        Ok(Self {
            id: record.session_id,
            topic: record.topic,
            depth: record.depth,
            created_at: record.created_at,
            updated_at: record.updated_at,
            visited_urls: record.visited_urls.into_iter().collect(),
            stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(url: &str) -> Finding {
        Finding {
            url: url.into(),
            title: format!("Title for {url}"),
            facts: vec!["a fact".into()],
        }
    }

    fn analyzed_session() -> Session {
        let mut session = Session::new("battery chemistry", Depth::Quick);
        session
            .advance(
                StepOutcome::Planned(vec![SubQuestion {
                    question: "What is LFP?".into(),
                    search_queries: vec!["LFP battery".into()],
                }]),
                [],
            )
            .unwrap();
        session
            .advance(
                StepOutcome::Searched(vec![SearchHit {
                    question: "What is LFP?".into(),
                    title: "LFP".into(),
                    url: "https://example.com/lfp".into(),
                    snippet: String::new(),
                }]),
                [],
            )
            .unwrap();
        session
            .advance(
                StepOutcome::Extracted(vec![finding("https://example.com/lfp")]),
                ["https://example.com/lfp".to_string()],
            )
            .unwrap();
        session
            .advance(StepOutcome::Analyzed("consensus: cheap".into()), [])
            .unwrap();
        session
    }

    #[test]
    fn advance_walks_steps_in_order() {
        let session = analyzed_session();
        assert_eq!(session.last_completed_step(), 4);
        assert_eq!(session.stage.analysis(), Some("consensus: cheap"));
        assert_eq!(session.stage.findings().unwrap().len(), 1);
        assert!(session.stage.all_findings().is_none());
        assert!(session.visited_urls.contains("https://example.com/lfp"));
    }

    #[test]
    fn advance_rejects_out_of_order_outcome() {
        let mut session = analyzed_session();
        let before = session.clone();
        let err = session
            .advance(StepOutcome::Synthesized("report".into()), ["https://x.test".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("step 6"));
        assert_eq!(session, before);
    }

    #[test]
    fn record_roundtrip_preserves_stage() {
        let session = analyzed_session();
        let record = CheckpointRecord::from(&session);
        assert_eq!(record.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(record.last_completed_step, 4);
        assert!(record.analysis.is_some());
        assert!(record.all_findings.is_none());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("lastCompletedStep"));
        assert!(json.contains("visitedUrls"));
        assert!(!json.contains("allFindings"));

        let parsed: CheckpointRecord = serde_json::from_str(&json).unwrap();
        let restored = Session::try_from(parsed).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn record_with_missing_payload_is_rejected() {
        let mut record = CheckpointRecord::from(&analyzed_session());
        record.findings = None;
        assert!(Session::try_from(record).is_err());
    }

    #[test]
    fn record_with_payload_beyond_step_is_rejected() {
        let mut record = CheckpointRecord::from(&analyzed_session());
        record.report = Some("premature".into());
        assert!(Session::try_from(record).is_err());
    }

    #[test]
    fn record_step_out_of_range_is_rejected() {
        let mut record = CheckpointRecord::from(&Session::new("t", Depth::Deep));
        record.last_completed_step = 9;
        assert!(Session::try_from(record).is_err());
    }
}
