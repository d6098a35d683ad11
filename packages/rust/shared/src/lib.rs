//! Shared types, error model, and configuration for deepdive.
//!
//! This crate is the foundation depended on by all other deepdive crates.
//! It provides:
//! - [`DeepDiveError`], the unified error type
//! - Domain types ([`Depth`], [`SessionId`], [`SubQuestion`], [`SearchHit`], [`Finding`])
//! - Session state ([`Session`], [`Stage`], [`CheckpointRecord`])
//! - Configuration ([`AppConfig`], [`ResearchConfig`], config loading)

pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, LlmBackend, LlmConfig, ResearchConfig, SearchBackend,
    SearchConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{DeepDiveError, Result};
pub use session::{CheckpointRecord, FINAL_STEP, Session, Stage, StepOutcome};
pub use types::{CURRENT_SCHEMA_VERSION, Depth, Finding, SearchHit, SessionId, SubQuestion};
