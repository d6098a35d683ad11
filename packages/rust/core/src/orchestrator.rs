//! Research Orchestrator: the checkpointed step pipeline.
//!
//! A run either starts a new session or resumes a stored one, then executes
//! every step after the session's last completed step:
//!
//! 1. plan sub-questions
//! 2. search
//! 3. extract findings
//! 4. cross-reference
//! 5. fill gaps
//! 6. synthesize the report
//! 7. clean up (report artifact, checkpoint removal)
//!
//! The session is saved after each of steps 1–6. Any error escaping a step
//! saves the last completed state and yields a resumable failure.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use deepdive_artifacts::{ArtifactWriter, ReportMeta};
use deepdive_renderer::{HttpRenderer, PageRenderer};
use deepdive_search::{SearchProvider, build_search_provider};
use deepdive_shared::{
    AppConfig, DeepDiveError, Depth, ResearchConfig, Result, Session, SessionId, StepOutcome,
};
use deepdive_storage::{DB_FILE_NAME, Storage};

use crate::analysis::cross_reference;
use crate::completion::{CompletionProvider, build_completion_provider};
use crate::gaps::GapFiller;
use crate::planner::plan;
use crate::report::synthesize;
use crate::retrieval::{Extractor, search_sub_questions};

/// Steps reported through [`ProgressReporter`], cleanup included.
pub const TOTAL_STEPS: u8 = 7;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Collaborators shared by every research run.
pub struct ResearchContext {
    pub completion: Arc<dyn CompletionProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub renderer: Arc<dyn PageRenderer>,
    pub store: Storage,
    pub artifacts: Option<ArtifactWriter>,
    pub config: ResearchConfig,
}

impl ResearchContext {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        search: Arc<dyn SearchProvider>,
        renderer: Arc<dyn PageRenderer>,
        store: Storage,
        config: ResearchConfig,
    ) -> Self {
        let artifacts = config.artifacts_dir.clone().map(ArtifactWriter::new);
        Self {
            completion,
            search,
            renderer,
            store,
            artifacts,
            config,
        }
    }

    /// Build the configured backends and open the checkpoint store.
    pub async fn from_config(config: &AppConfig, api_key: String) -> Result<Self> {
        let completion = build_completion_provider(&config.llm, api_key)?;
        let search = build_search_provider(&config.search)?;
        let renderer = HttpRenderer::new(&config.fetch)?;
        let store = Storage::open(&config.data_dir().join(DB_FILE_NAME)).await?;

        info!(
            model = completion.model(),
            search = search.name(),
            "research context ready"
        );

        Ok(Self::new(
            Arc::from(completion),
            Arc::from(search),
            Arc::new(renderer),
            store,
            ResearchConfig::from(config),
        ))
    }
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// One invocation of the engine.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub topic: String,
    pub depth: Depth,
    /// Session to resume, as given by the caller.
    pub session_id: Option<String>,
}

/// Text handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchResponse {
    pub text: String,
    pub is_error: bool,
}

/// A request refused before any step ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Topic must not be empty.")]
    EmptyTopic,

    #[error(
        "Invalid session id \"{0}\". Start a fresh research session without a sessionId."
    )]
    InvalidSessionId(String),

    #[error(
        "No valid checkpoint found for session {0}. Start a fresh research session without a sessionId."
    )]
    NoCheckpoint(SessionId),

    #[error(
        "Topic mismatch: checkpoint has \"{stored}\" but request has \"{requested}\". Use the original topic or start a new session."
    )]
    TopicMismatch { stored: String, requested: String },
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct ResearchSummary {
    pub session_id: SessionId,
    pub topic: String,
    pub depth: Depth,
    pub report: String,
    pub finding_count: usize,
    pub visited_urls: BTreeSet<String>,
    pub duration: Duration,
    /// Saved report, when artifacts are enabled and the write succeeded.
    pub report_path: Option<PathBuf>,
}

/// How a run ended.
#[derive(Debug)]
pub enum ResearchOutcome {
    Completed(ResearchSummary),
    Failed {
        session_id: SessionId,
        error: DeepDiveError,
    },
    Rejected(Rejection),
}

impl ResearchOutcome {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Completed(summary) => Some(summary.session_id),
            Self::Failed { session_id, .. } => Some(*session_id),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Completed(_))
    }

    /// Render the caller-facing text.
    pub fn to_response(&self) -> ResearchResponse {
        let text = match self {
            Self::Completed(summary) => {
                format!("{}\n\n<!-- sessionId: {} -->", summary.report, summary.session_id)
            }
            Self::Failed { session_id, error } => format!(
                "Deep research failed: {error}\n\nYou can resume this session by passing sessionId: \"{session_id}\" with the same topic."
            ),
            Self::Rejected(rejection) => rejection.to_string(),
        };
        ResearchResponse {
            text,
            is_error: self.is_error(),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a step starts.
    fn step(&self, index: u8, total: u8, label: &str);
    /// Called once when the run ends, however it ends.
    fn done(&self, outcome: &ResearchOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step(&self, _index: u8, _total: u8, _label: &str) {}
    fn done(&self, _outcome: &ResearchOutcome) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run (or resume) one research session.
#[instrument(skip_all, fields(topic = %request.topic, depth = %request.depth))]
pub async fn run_research(
    ctx: &ResearchContext,
    request: &ResearchRequest,
    progress: &dyn ProgressReporter,
) -> ResearchOutcome {
    let outcome = match open_session(ctx, request).await {
        Ok(mut session) => {
            let start = Instant::now();
            let mut visited = session.visited_urls.clone();
            match execute_steps(ctx, &mut session, &mut visited, progress).await {
                Ok(()) => ResearchOutcome::Completed(finish(ctx, session, start, progress).await),
                Err(e) => fail(ctx, &mut session, visited, e, start).await,
            }
        }
        Err(Opening::Rejected(rejection)) => {
            warn!(reason = %rejection, "research request rejected");
            ResearchOutcome::Rejected(rejection)
        }
        Err(Opening::Failed { session_id, error }) => {
            error!(session_id = %session_id, error = %error, "failed to load checkpoint");
            ResearchOutcome::Failed { session_id, error }
        }
    };

    progress.done(&outcome);
    outcome
}

enum Opening {
    Rejected(Rejection),
    Failed {
        session_id: SessionId,
        error: DeepDiveError,
    },
}

/// Create a fresh session, or load and validate the one being resumed.
async fn open_session(
    ctx: &ResearchContext,
    request: &ResearchRequest,
) -> std::result::Result<Session, Opening> {
    if request.topic.trim().is_empty() {
        return Err(Opening::Rejected(Rejection::EmptyTopic));
    }

    let Some(raw_id) = request.session_id.as_deref() else {
        let session = Session::new(request.topic.clone(), request.depth);
        info!(session_id = %session.id, "starting deep research");
        return Ok(session);
    };

    let id = SessionId::parse(raw_id)
        .map_err(|_| Opening::Rejected(Rejection::InvalidSessionId(raw_id.to_string())))?;

    let session = match ctx.store.load(&id).await {
        Ok(Some(session)) => session,
        Ok(None) => return Err(Opening::Rejected(Rejection::NoCheckpoint(id))),
        Err(error) => {
            return Err(Opening::Failed {
                session_id: id,
                error,
            });
        }
    };

    if session.topic != request.topic {
        return Err(Opening::Rejected(Rejection::TopicMismatch {
            stored: session.topic,
            requested: request.topic.clone(),
        }));
    }
    if session.depth != request.depth {
        warn!(
            stored = %session.depth,
            requested = %request.depth,
            "resuming with the checkpoint's depth"
        );
    }

    info!(
        session_id = %id,
        from_step = session.last_completed_step() + 1,
        "resuming deep research"
    );
    Ok(session)
}

/// Run every step after the session's last completed one.
///
/// `visited` is the working set of fetched URLs. It runs ahead of the
/// session's own set while a step is in flight.
async fn execute_steps(
    ctx: &ResearchContext,
    session: &mut Session,
    visited: &mut BTreeSet<String>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let completion = ctx.completion.as_ref();
    let mut extractor = Extractor::new(completion, ctx.renderer.as_ref(), &ctx.config);
    if let Some(writer) = &ctx.artifacts {
        extractor = extractor.with_archive(writer, session.id);
    }

    if session.last_completed_step() < 1 {
        progress.step(1, TOTAL_STEPS, "Decomposing topic into sub-questions");
        let sub_questions = plan(completion, &session.topic, session.depth).await?;
        info!(count = sub_questions.len(), "decomposition complete");
        commit(ctx, session, StepOutcome::Planned(sub_questions), visited).await?;
    }

    if session.last_completed_step() < 2 {
        let sub_questions = required(session.stage.sub_questions(), "sub-questions")?;
        progress.step(
            2,
            TOTAL_STEPS,
            &format!("Searching for {} sub-questions", sub_questions.len()),
        );
        let batch =
            search_sub_questions(ctx.search.as_ref(), sub_questions, ctx.config.results_per_query)
                .await;
        if batch.all_failed() {
            return Err(DeepDiveError::Search(format!(
                "all {} search queries failed",
                batch.queries
            )));
        }
        commit(ctx, session, StepOutcome::Searched(batch.hits), visited).await?;
    }

    if session.last_completed_step() < 3 {
        let hits = required(session.stage.hits(), "search results")?;
        progress.step(
            3,
            TOTAL_STEPS,
            &format!("Extracting content from {} results", hits.len()),
        );
        let batch = extractor
            .extract(hits, session.depth.page_budget(), visited)
            .await;
        if batch.all_failed() {
            return Err(DeepDiveError::validation(format!(
                "extraction failed for all {} pages",
                batch.attempted
            )));
        }
        commit(ctx, session, StepOutcome::Extracted(batch.findings), visited).await?;
    }

    if session.last_completed_step() < 4 {
        let findings = required(session.stage.findings(), "findings")?;
        progress.step(
            4,
            TOTAL_STEPS,
            &format!("Cross-referencing {} findings", findings.len()),
        );
        let analysis = cross_reference(completion, &session.topic, findings).await?;
        commit(ctx, session, StepOutcome::Analyzed(analysis), visited).await?;
    }

    if session.last_completed_step() < 5 {
        progress.step(5, TOTAL_STEPS, "Filling knowledge gaps with additional searches");
        let findings = required(session.stage.findings(), "findings")?;
        let analysis = required(session.stage.analysis(), "analysis")?;
        let fill = GapFiller::new(
            completion,
            ctx.search.as_ref(),
            &extractor,
            ctx.config.gap_results_per_query,
        )
        .fill(&session.topic, analysis, findings, session.depth, visited)
        .await;
        info!(
            rounds = fill.rounds,
            total_findings = fill.findings.len(),
            "gap filling complete"
        );
        commit(ctx, session, StepOutcome::GapFilled(fill.findings), visited).await?;
    }

    if session.last_completed_step() < 6 {
        let findings = required(session.stage.all_findings(), "accumulated findings")?;
        let analysis = required(session.stage.analysis(), "analysis")?;
        progress.step(
            6,
            TOTAL_STEPS,
            &format!("Synthesizing report from {} findings", findings.len()),
        );
        let report = synthesize(completion, &session.topic, analysis, findings).await?;
        commit(ctx, session, StepOutcome::Synthesized(report), visited).await?;
    }

    Ok(())
}

/// Record a completed step and persist the session.
async fn commit(
    ctx: &ResearchContext,
    session: &mut Session,
    outcome: StepOutcome,
    visited: &BTreeSet<String>,
) -> Result<()> {
    let step = outcome.step();
    session.advance(outcome, visited.iter().cloned())?;
    ctx.store.save(session).await?;
    info!(session_id = %session.id, step, "checkpoint saved");
    Ok(())
}

fn required<'s, T: ?Sized>(value: Option<&'s T>, what: &str) -> Result<&'s T> {
    value.ok_or_else(|| DeepDiveError::validation(format!("session state is missing {what}")))
}

/// Step 7: archive the report and drop the checkpoint.
async fn finish(
    ctx: &ResearchContext,
    session: Session,
    start: Instant,
    progress: &dyn ProgressReporter,
) -> ResearchSummary {
    progress.step(7, TOTAL_STEPS, "Research complete");

    let report = session.stage.report().unwrap_or_default().to_string();
    let finding_count = session.stage.all_findings().map_or(0, <[_]>::len);

    let report_path = ctx.artifacts.as_ref().and_then(|writer| {
        let meta = ReportMeta {
            topic: &session.topic,
            depth: session.depth,
            session_id: session.id,
            created_at: session.created_at,
            source_count: finding_count,
        };
        writer
            .write_report(&meta, &report)
            .inspect_err(|e| warn!(error = %e, "failed to save report artifact"))
            .ok()
    });

    if let Err(e) = ctx.store.delete(&session.id).await {
        warn!(session_id = %session.id, error = %e, "failed to delete checkpoint");
    }

    let duration = start.elapsed();
    info!(
        session_id = %session.id,
        findings = finding_count,
        pages_visited = session.visited_urls.len(),
        duration_ms = duration.as_millis() as u64,
        "deep research complete"
    );

    ResearchSummary {
        session_id: session.id,
        topic: session.topic,
        depth: session.depth,
        report,
        finding_count,
        visited_urls: session.visited_urls,
        duration,
        report_path,
    }
}

/// Persist the last completed state, plus every URL fetched so far, and
/// build the failure outcome.
async fn fail(
    ctx: &ResearchContext,
    session: &mut Session,
    visited: BTreeSet<String>,
    error: DeepDiveError,
    start: Instant,
) -> ResearchOutcome {
    session.visited_urls.extend(visited);

    error!(
        session_id = %session.id,
        step = session.last_completed_step() + 1,
        error = %error,
        duration_ms = start.elapsed().as_millis() as u64,
        "deep research failed"
    );

    if let Err(save_err) = ctx.store.save(session).await {
        error!(session_id = %session.id, error = %save_err, "failed to save checkpoint on error");
    }

    ResearchOutcome::Failed {
        session_id: session.id,
        error,
    }
}
