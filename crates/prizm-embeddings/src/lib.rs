//! # prizm-embeddings
//!
//! Local embedding service for the Prizm agent backend.
//!
//! The [`EmbeddingController`] owns a single sentence-embedding model: it
//! loads it on demand (cache, bundled assets, or download), serializes
//! concurrent inference through a bounded FIFO admission queue, keeps
//! sliding-window latency statistics, and supports dispose/reset so the
//! host can swap models without restarting or stranding waiting callers.
//!
//! ## Features
//! - Local inference via Candle (no Python, no API)
//! - all-MiniLM-L6-v2 by default (384 dimensions)
//! - Swappable [`ModelBackend`] for tests and other runtimes
//! - Works offline from bundled assets or a warm cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! let controller = EmbeddingController::new(settings, Arc::new(CandleBackend::new()));
//! controller.init().await;
//! let vector = controller.embed("remember to buy milk").await?;
//! ```

pub mod admission;
pub mod backend;
pub mod cache;
pub mod candle;
pub mod controller;
pub mod error;
pub mod model;
pub mod provider;
pub mod source;
pub mod state;
pub mod stats;
pub mod status;

pub use crate::candle::{CandleBackend, CandleEmbedder, CandleHandle};
pub use admission::{InferenceSlotQueue, SlotPermit};
pub use backend::{
    InferenceHandle, InferenceOptions, InferenceOutput, LoadOptions, ModelBackend, Pooling,
};
pub use cache::{
    get_or_download_model, has_model, ModelCache, ModelPaths, MARKER_FILES, MODEL_FILES,
};
pub use controller::{EmbeddingController, DEFAULT_DIMENSION, WARMUP_TEXT};
pub use error::{EmbeddingError, ServiceError};
pub use model::{cosine_similarity, l2_norm, normalize};
pub use provider::{EmbeddingProvider, ProviderRegistry};
pub use source::{resolve_model_source, ModelSource, ModelSourceResolution};
pub use state::LifecycleState;
pub use stats::{LastError, StatsSnapshot, StatsWindow, STATS_WINDOW_SIZE};
pub use status::{process_memory_bytes, EmbeddingStatus};
