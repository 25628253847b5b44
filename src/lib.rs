//! # semindex - Semantic search over a document directory
//!
//! Indexes a directory of text documents into a vector store in the
//! background and answers similarity queries against it, with ranked,
//! provenance-tagged results.
//!
//! ## Features
//!
//! - **Non-blocking**: Indexing runs on its own thread; queries issued before
//!   the index has data get an `indexing_in_progress` answer
//! - **Pluggable embeddings**: Local ONNX models via fastembed, or the
//!   Vertex AI text embedding API
//! - **Persistent**: Uses HNSW (usearch) on disk, reused across restarts
//! - **Function calling**: JSON entry point and parameter schema for
//!   model-driven callers
//!
//! ## Example
//!
//! ```no_run
//! use semindex::{Config, SearchRequest, SearchResponse, SemanticSearchTool};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let tool = SemanticSearchTool::new(
//!         "docs",
//!         "Search the project documentation",
//!         Config::new("./docs"),
//!     )?;
//!     tool.wait_until_idle(Duration::from_secs(300));
//!
//!     if let SearchResponse::Success(found) =
//!         tool.search(&SearchRequest::new("how do I deploy?"))
//!     {
//!         for result in found.results {
//!             println!("{}#{} (score: {:.2})",
//!                 result.file_path,
//!                 result.chunk_index,
//!                 result.similarity_score
//!             );
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod cloud;
pub mod config;
pub mod embedder;
pub mod error;
pub mod index;
pub mod indexer;
pub mod searcher;
pub mod tool;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use chunker::{chunk_text, Chunker, DocumentChunk};
pub use cloud::CloudEmbedder;
pub use config::{Config, EmbeddingModel, ProviderKind};
pub use embedder::{EmbeddingProvider, LocalEmbedder};
pub use error::{IndexRunError, Result, SemindexError};
pub use index::{MemoryStore, Neighbor, UsearchStore, VectorStore};
pub use indexer::{IndexReport, Indexer};
pub use searcher::{format_results, format_results_json, QueryResult, Searcher, SimilarityStats};
pub use tool::{
    IndexState, IndexStatus, SearchRequest, SearchResponse, SemanticSearchTool, ToolParam,
};
