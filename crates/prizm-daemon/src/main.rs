//! Prizm embedding service host
//!
//! Runs the local embedding model with the memory index attached.
//!
//! # Usage
//!
//! ```bash
//! prizm-embed start [--precision fp16] [--max-concurrency 2]
//! prizm-embed status
//! prizm-embed embed "some text" "more text"
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/prizm/config.toml)
//! 3. Environment variables (PRIZM__*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use prizm_daemon::{run_embed, run_start, run_status, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Start { overrides } => {
            run_start(config, log_level, &overrides).await?;
        }
        Commands::Status { overrides } => {
            run_status(config, log_level, &overrides).await?;
        }
        Commands::Embed { overrides, texts } => {
            run_embed(config, log_level, &overrides, &texts).await?;
        }
    }

    Ok(())
}
