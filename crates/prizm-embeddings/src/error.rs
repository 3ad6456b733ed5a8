//! Embedding error types.
//!
//! [`EmbeddingError`] covers backend work (model files, tokenizer, tensors).
//! [`ServiceError`] is what callers of the lifecycle controller see.

use thiserror::Error;

use crate::state::LifecycleState;

/// Errors that can occur inside a model backend.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Candle model error
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model file not found
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Download error
    #[error("Failed to download model: {0}")]
    Download(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Precision mode the backend cannot load
    #[error("Unsupported precision: {0}")]
    UnsupportedPrecision(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Blocking task failed or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the embedding lifecycle controller.
///
/// `Clone` so a single load outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// Configuration opts out of local embeddings
    #[error("Embedding service is disabled by configuration")]
    ModelDisabled,

    /// Model load exceeded its deadline
    #[error("Model load timeout after {timeout_ms}ms")]
    ModelLoadTimeout { timeout_ms: u64 },

    /// Any other load failure
    #[error("Model load failed: {0}")]
    ModelLoadFailure(String),

    /// Model is not in the ready state
    #[error("Embedding model not ready (state: {0})")]
    ModelNotReady(LifecycleState),

    /// Backend inference call failed
    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    /// Controller was disposed while the caller waited
    #[error("Embedding service disposed")]
    Disposed,
}
