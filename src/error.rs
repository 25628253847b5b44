//! Custom error types for semindex
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations.

use thiserror::Error;

/// Application-specific errors for semindex
#[derive(Error, Debug)]
pub enum SemindexError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding model failed to load or embed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector store operations failed
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding API request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid file or directory path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a background indexing run stopped early.
///
/// The two phases are kept apart because they are handled differently:
/// a failed scan still completes the index, a failed upsert does not.
#[derive(Error, Debug)]
pub enum IndexRunError {
    /// Enumerating or reading the scan directory failed
    #[error("scan failed: {0}")]
    Scan(#[source] SemindexError),

    /// Embedding or storing a batch failed
    #[error("batch {batch} failed: {source}")]
    Upsert {
        /// 1-based batch number
        batch: usize,
        #[source]
        source: SemindexError,
    },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SemindexError>;
