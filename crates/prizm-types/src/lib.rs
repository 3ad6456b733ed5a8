//! # prizm-types
//!
//! Shared configuration and error types for the Prizm agent backend.
//!
//! - [`Settings`]: layered process configuration (defaults, file, env)
//! - [`EmbeddingSettings`]: local embedding service configuration
//! - [`PrecisionMode`]: numeric precision the embedding model is loaded with
//! - [`PrizmError`]: error type for configuration loading
//!
//! ## Usage
//!
//! ```rust
//! use prizm_types::{EmbeddingSettings, PrecisionMode};
//!
//! let settings = EmbeddingSettings::default();
//! assert_eq!(settings.precision, PrecisionMode::Fp32);
//! ```

pub mod config;
pub mod error;

pub use config::{EmbeddingSettings, PrecisionMode, Settings};
pub use error::PrizmError;
