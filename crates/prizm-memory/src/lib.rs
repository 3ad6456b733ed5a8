//! # prizm-memory
//!
//! Memory store that consumes the embedding provider registered by the
//! embedding service. Saving never depends on the model: when no provider
//! is registered, or it fails, the memory is kept without a vector and
//! searched by keyword instead.

pub mod error;
pub mod index;

pub use error::MemoryIndexError;
pub use index::{
    IndexMetrics, IndexMetricsSnapshot, MemoryIndex, MemoryRecord, SearchHit, SearchMode,
};
