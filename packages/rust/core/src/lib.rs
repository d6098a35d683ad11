//! Research engine for deepdive.
//!
//! Turns a topic into a cited report through a checkpointed pipeline:
//! planning, search, page extraction, cross-referencing, gap filling and
//! synthesis. The entry point is [`run_research`]; every stage is also
//! usable on its own.

pub mod analysis;
pub mod completion;
pub mod gaps;
pub mod orchestrator;
pub mod parse;
pub mod planner;
mod prompts;
pub mod report;
pub mod retrieval;

#[cfg(test)]
mod testing;

pub use completion::{Completion, CompletionProvider, Usage, build_completion_provider};
pub use orchestrator::{
    ProgressReporter, Rejection, ResearchContext, ResearchOutcome, ResearchRequest,
    ResearchResponse, ResearchSummary, SilentProgress, TOTAL_STEPS, run_research,
};
pub use parse::{Structured, parse_structured};
