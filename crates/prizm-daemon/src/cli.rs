//! CLI argument parsing for the embedding host.
//!
//! CLI flags override every other configuration source.

use clap::{Args, Parser, Subcommand};
use prizm_types::PrecisionMode;

/// Prizm embedding service
///
/// Loads a local sentence-embedding model and serves it to the memory index.
#[derive(Parser, Debug)]
#[command(name = "prizm-embed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/prizm/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Embedding settings that can be overridden per invocation.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct EmbeddingOverrides {
    /// Weight precision (q4, q8, fp16, fp32)
    #[arg(long)]
    pub precision: Option<PrecisionMode>,

    /// Maximum concurrent inference calls
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Model identifier, e.g. sentence-transformers/all-MiniLM-L6-v2
    #[arg(long)]
    pub model: Option<String>,

    /// Disable local embeddings entirely
    #[arg(long)]
    pub no_embeddings: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the model and serve until interrupted
    Start {
        #[command(flatten)]
        overrides: EmbeddingOverrides,
    },

    /// Load the model and print the service status as JSON
    Status {
        #[command(flatten)]
        overrides: EmbeddingOverrides,
    },

    /// Embed texts and print one JSON line per text
    Embed {
        #[command(flatten)]
        overrides: EmbeddingOverrides,

        /// Texts to embed
        #[arg(required = true)]
        texts: Vec<String>,
    },
}
