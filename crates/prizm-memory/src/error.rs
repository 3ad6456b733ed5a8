//! Error types for the memory index.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MemoryIndexError {
    #[error("Memory content is empty")]
    EmptyContent,

    #[error("Invalid memory id: {0}")]
    InvalidId(String),
}
