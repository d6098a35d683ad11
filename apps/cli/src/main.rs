//! deepdive CLI: checkpointed, resumable web research from the terminal.
//!
//! Turns a topic into a cited markdown report. Interrupted runs can be
//! resumed by session id.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
