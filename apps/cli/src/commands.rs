//! CLI command definitions, routing, and tracing setup.

use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use deepdive_core::{
    ProgressReporter, ResearchContext, ResearchOutcome, ResearchRequest, run_research,
};
use deepdive_markdown::{extract_links, extract_markdown, extract_metadata};
use deepdive_renderer::{HttpRenderer, PageRenderer};
use deepdive_search::build_search_provider;
use deepdive_shared::{
    AppConfig, CheckpointRecord, Depth, SessionId, init_config, load_config, validate_api_key,
};
use deepdive_storage::{DB_FILE_NAME, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// deepdive: research a topic on the web and get a cited report.
#[derive(Parser)]
#[command(
    name = "deepdive",
    version,
    about = "Checkpointed, resumable deep research: topic in, cited report out.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Research depth as accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum DepthArg {
    Quick,
    Standard,
    Deep,
}

impl From<DepthArg> for Depth {
    fn from(arg: DepthArg) -> Self {
        match arg {
            DepthArg::Quick => Depth::Quick,
            DepthArg::Standard => Depth::Standard,
            DepthArg::Deep => Depth::Deep,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a topic and print the report.
    Research {
        /// Topic or question to research.
        topic: String,

        /// Effort level (defaults to `[defaults] depth`).
        #[arg(short, long)]
        depth: Option<DepthArg>,

        /// Resume the session with this id. The topic must match.
        #[arg(short, long)]
        session: Option<String>,

        /// Hide the step spinner.
        #[arg(long)]
        quiet: bool,
    },

    /// Inspect or remove resumable sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Run one web search with the configured engine.
    Search {
        /// Search query.
        query: String,

        /// Maximum number of results.
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },

    /// Fetch a page and print its readable text.
    Visit {
        /// Page URL.
        url: String,

        /// Character budget for the extracted text.
        #[arg(long)]
        max_chars: Option<usize>,

        /// Also list the page's outbound links.
        #[arg(long)]
        links: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Session subcommands.
#[derive(Subcommand)]
pub(crate) enum SessionsAction {
    /// List sessions that can be resumed.
    List,
    /// Print a session's checkpoint as JSON.
    Show {
        /// Session id.
        id: String,
    },
    /// Delete a session's checkpoint.
    Delete {
        /// Session id.
        id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "deepdive=info",
        1 => "deepdive=debug",
        _ => "deepdive=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Research {
            topic,
            depth,
            session,
            quiet,
        } => cmd_research(topic, depth, session, quiet).await,
        Command::Sessions { action } => match action {
            SessionsAction::List => cmd_sessions_list().await,
            SessionsAction::Show { id } => cmd_sessions_show(&id).await,
            SessionsAction::Delete { id } => cmd_sessions_delete(&id).await,
        },
        Command::Search { query, limit } => cmd_search(&query, limit).await,
        Command::Visit {
            url,
            max_chars,
            links,
        } => cmd_visit(&url, max_chars, links).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// research
// ---------------------------------------------------------------------------

async fn cmd_research(
    topic: String,
    depth: Option<DepthArg>,
    session: Option<String>,
    quiet: bool,
) -> Result<()> {
    // Validate API key before doing anything
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let request = ResearchRequest {
        topic,
        depth: depth.map(Depth::from).unwrap_or(config.defaults.depth),
        session_id: session,
    };
    info!(
        topic = %request.topic,
        depth = %request.depth,
        resume = request.session_id.is_some(),
        "starting research"
    );

    let ctx = ResearchContext::from_config(&config, api_key).await?;
    let reporter = CliProgress::new(quiet);
    let outcome = run_research(&ctx, &request, &reporter).await;

    if let Err(e) = ctx.renderer.close_all().await {
        warn!(error = %e, "failed to release renderer pages");
    }

    if let ResearchOutcome::Completed(summary) = &outcome {
        info!(
            session_id = %summary.session_id,
            findings = summary.finding_count,
            pages = summary.visited_urls.len(),
            elapsed_secs = summary.duration.as_secs_f64(),
            "research complete"
        );
        if let Some(path) = &summary.report_path {
            info!(path = %path.display(), "report saved");
        }
    }

    let response = outcome.to_response();
    if response.is_error {
        return Err(eyre!("{}", response.text));
    }
    println!("{}", response.text);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        if quiet {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }

        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn step(&self, index: u8, total: u8, label: &str) {
        self.spinner.set_prefix(format!("[{index}/{total}]"));
        self.spinner.set_message(label.to_string());
    }

    fn done(&self, _outcome: &ResearchOutcome) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// sessions
// ---------------------------------------------------------------------------

/// Open the checkpoint store read-only, or `None` if nothing was ever saved.
async fn open_store_readonly(config: &AppConfig) -> Result<Option<Storage>> {
    let path = config.data_dir().join(DB_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Storage::open_readonly(&path).await?))
}

async fn cmd_sessions_list() -> Result<()> {
    let config = load_config()?;
    let sessions = match open_store_readonly(&config).await? {
        Some(store) => store.list().await?,
        None => Vec::new(),
    };

    if sessions.is_empty() {
        println!("No resumable sessions.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<4}  {:<16}  TOPIC",
        "SESSION", "DEPTH", "STEP", "UPDATED"
    );
    for session in &sessions {
        println!(
            "{:<36}  {:<8}  {:<4}  {:<16}  {}",
            session.id,
            session.depth,
            format!("{}/6", session.last_completed_step()),
            session
                .updated_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            session.topic
        );
    }
    Ok(())
}

async fn cmd_sessions_show(id: &str) -> Result<()> {
    let id = SessionId::parse(id)?;
    let config = load_config()?;
    let store = open_store_readonly(&config)
        .await?
        .ok_or_else(|| eyre!("no checkpoint found for session {id}"))?;

    let session = store
        .load(&id)
        .await?
        .ok_or_else(|| eyre!("no checkpoint found for session {id}"))?;
    let record = CheckpointRecord::from(&session);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_sessions_delete(id: &str) -> Result<()> {
    let id = SessionId::parse(id)?;
    let config = load_config()?;
    let store = Storage::open(&config.data_dir().join(DB_FILE_NAME)).await?;

    if !store.exists(&id).await? {
        return Err(eyre!("no checkpoint found for session {id}"));
    }
    store.delete(&id).await?;
    info!(session_id = %id, "checkpoint deleted");
    println!("Deleted session {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// search / visit
// ---------------------------------------------------------------------------

async fn cmd_search(query: &str, limit: usize) -> Result<()> {
    let config = load_config()?;
    let provider = build_search_provider(&config.search)?;
    info!(engine = provider.name(), query, limit, "searching");

    let results = provider.search(query, limit).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!("{}. {}", i + 1, r.title);
        println!("   {}", r.url);
        if !r.snippet.is_empty() {
            println!("   {}", r.snippet);
        }
        println!();
    }
    Ok(())
}

async fn cmd_visit(url: &str, max_chars: Option<usize>, links: bool) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let config = load_config()?;
    let max_chars = max_chars.unwrap_or(config.fetch.max_page_chars);

    let renderer = HttpRenderer::new(&config.fetch)?;
    let page = renderer.open_page().await?;
    let html = async {
        renderer.navigate(page, parsed.as_str()).await?;
        renderer.content(page).await
    }
    .await;
    renderer.close_page(page).await?;
    let html = html?;

    let meta = extract_metadata(&html);
    let text = extract_markdown(&html, parsed.as_str(), max_chars)?;

    if !meta.title.is_empty() {
        println!("# {}\n", meta.title);
    }
    if !meta.description.is_empty() {
        println!("> {}\n", meta.description);
    }
    println!("{text}");

    if links {
        println!("\n## Links\n");
        for link in extract_links(&html, parsed.as_str()) {
            let label = if link.text.is_empty() {
                link.href.as_str()
            } else {
                link.text.as_str()
            };
            println!("- [{label}]({})", link.href);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
