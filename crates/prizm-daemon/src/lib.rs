//! Prizm embedding host library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, status, embed)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, EmbeddingOverrides};
pub use commands::{
    apply_overrides, embed_texts, load_settings, run_embed, run_start, run_status, EmbedLine,
    Service,
};
