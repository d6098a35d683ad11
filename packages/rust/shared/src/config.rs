//! Application configuration for deepdive.
//!
//! User config lives at `~/.deepdive/deepdive.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeepDiveError, Result};
use crate::types::Depth;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "deepdive.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".deepdive";

// ---------------------------------------------------------------------------
// Config structs (matching deepdive.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Completion provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Page fetching and extraction limits.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Research depth used when the caller does not pick one.
    #[serde(default)]
    pub depth: Depth,

    /// Directory holding the checkpoint database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Where archived sources and reports are written. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            depth: Depth::default(),
            data_dir: default_data_dir(),
            artifacts_dir: None,
        }
    }
}

fn default_data_dir() -> String {
    "~/.deepdive".into()
}

/// Which completion backend to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Any OpenAI-compatible `/chat/completions` endpoint (OpenAI, OpenRouter, local servers).
    #[default]
    Openai,
    /// Anthropic Messages API.
    Anthropic,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmBackend,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API base URL, without the endpoint path.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmBackend::default(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "LLM_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_llm_timeout() -> u64 {
    120
}

/// Which search backend to query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    #[default]
    Duckduckgo,
    Bing,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub engine: SearchBackend,

    /// Results requested per sub-question query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    /// Results requested per gap-filling query.
    #[serde(default = "default_gap_results_per_query")]
    pub gap_results_per_query: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine: SearchBackend::default(),
            results_per_query: default_results_per_query(),
            gap_results_per_query: default_gap_results_per_query(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_results_per_query() -> usize {
    5
}
fn default_gap_results_per_query() -> usize {
    3
}
fn default_search_timeout() -> u64 {
    20
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Character budget for a page's extracted text sent to the model.
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,

    /// Length of the raw reply kept when fact extraction is unstructured.
    #[serde(default = "default_fallback_fact_chars")]
    pub fallback_fact_chars: usize,

    /// Allow fetching loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_page_chars: default_max_page_chars(),
            fallback_fact_chars: default_fallback_fact_chars(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_page_chars() -> usize {
    20_000
}
fn default_fallback_fact_chars() -> usize {
    500
}

// ---------------------------------------------------------------------------
// Research config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime limits for one research run, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Results requested per sub-question query.
    pub results_per_query: usize,
    /// Results requested per gap-filling query.
    pub gap_results_per_query: usize,
    /// Character budget for extracted page text.
    pub max_page_chars: usize,
    /// Prefix length kept from an unstructured fact-extraction reply.
    pub fallback_fact_chars: usize,
    /// Root for derived artifacts; `None` disables them.
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResearchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            results_per_query: config.search.results_per_query,
            gap_results_per_query: config.search.gap_results_per_query,
            max_page_chars: config.fetch.max_page_chars,
            fallback_fact_chars: config.fetch.fallback_fact_chars,
            artifacts_dir: config.defaults.artifacts_dir.as_deref().map(expand_home),
        }
    }
}

impl AppConfig {
    /// Resolved directory for the checkpoint database.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.defaults.data_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.deepdive/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DeepDiveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.deepdive/deepdive.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DeepDiveError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DeepDiveError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DeepDiveError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DeepDiveError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DeepDiveError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the completion API key from the env var named in the config.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DeepDiveError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}
