//! Text chunking for semantic search
//!
//! Splits documents into overlapping fixed-size windows suitable for
//! embedding. Sizes are counted in characters, not bytes.

use crate::config::file_extension;
use crate::error::{Result, SemindexError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// A chunk of a source document with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique identifier, stable across scans of the same file
    pub id: String,
    /// The text content
    pub content: String,
    /// Source file path as found during the scan
    pub file_path: String,
    /// Final path component of the source file
    pub file_name: String,
    /// Position of this chunk in the file's chunk sequence (0-based)
    pub chunk_index: usize,
    /// File suffix including the leading dot
    pub extension: String,
}

/// Splits text into overlapping chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a new chunker with specified sizes
    ///
    /// # Arguments
    /// * `chunk_size` - Size of each chunk in characters
    /// * `overlap` - Number of characters shared by consecutive chunks
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(SemindexError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    /// Split text into raw windows, see [`chunk_text`]
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        chunk_text(text, self.chunk_size, self.overlap)
    }

    /// Chunk a whole file into [`DocumentChunk`]s
    ///
    /// Whitespace-only windows are dropped; the survivors keep the index
    /// they had in the raw window sequence.
    pub fn chunk_file(&self, path: &Path, content: &str) -> Vec<DocumentChunk> {
        let file_path = path.to_string_lossy().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.clone());
        let extension = file_extension(path).unwrap_or_default();
        let digest = path_digest(&file_path);

        self.split(content)
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(chunk_index, text)| DocumentChunk {
                id: format!("{}_{}", digest, chunk_index),
                content: text.to_string(),
                file_path: file_path.clone(),
                file_name: file_name.clone(),
                chunk_index,
                extension: extension.clone(),
            })
            .collect()
    }
}

/// Split `text` into windows of `chunk_size` characters, consecutive
/// windows sharing `overlap` characters.
///
/// Text no longer than `chunk_size` comes back as a single chunk. The last
/// window may be shorter. Callers must ensure `overlap < chunk_size`;
/// [`Chunker::new`] enforces it.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    debug_assert!(overlap < chunk_size);

    // Byte offset of every char boundary, including the end of the text
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    if len <= chunk_size {
        return vec![text];
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(len / step + 1);
    let mut start = 0;

    loop {
        let end = start + chunk_size;
        if end >= len {
            chunks.push(&text[bounds[start]..]);
            break;
        }
        chunks.push(&text[bounds[start]..bounds[end]]);
        start += step;
    }

    chunks
}

fn path_digest(file_path: &str) -> String {
    let hash = hex::encode(Sha256::digest(file_path.as_bytes()));
    hash[..16].to_string()
}
