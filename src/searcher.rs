//! Search functionality and result formatting
//!
//! Embeds a query, asks the store for its nearest chunks, converts cosine
//! distances to similarity scores and applies the similarity threshold.
//! Also formats results for terminal display or JSON output.

use crate::embedder::EmbeddingProvider;
use crate::error::Result;
use crate::index::{Neighbor, VectorStore};
use colored::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One ranked search hit with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Chunk text
    pub content: String,
    /// Similarity to the query (higher is better)
    pub similarity_score: f64,
    /// Source file path
    pub file_path: String,
    /// Source file name
    pub file_name: String,
    /// Position of the chunk within its file
    pub chunk_index: usize,
    /// Source file suffix, e.g. ".md"
    pub extension: String,
}

/// Similarity of every candidate the store returned, kept or not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub all_similarity_scores: Vec<f64>,
    pub max_similarity: f64,
    pub min_similarity: f64,
}

impl SimilarityStats {
    fn from_scores(scores: Vec<f64>) -> Self {
        let max_similarity = scores.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let min_similarity = scores.iter().copied().reduce(f64::min).unwrap_or(0.0);
        Self {
            all_similarity_scores: scores,
            max_similarity,
            min_similarity,
        }
    }
}

/// Ranked results plus the similarity distribution they were cut from
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Hits at or above the threshold, most similar first
    pub results: Vec<QueryResult>,
    /// Scores of all candidates
    pub debug: SimilarityStats,
}

/// Semantic searcher
pub struct Searcher {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Searcher {
    /// Create a searcher over a store filled by the same provider
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { provider, store }
    }

    /// Search for chunks matching the query
    ///
    /// At most `limit` candidates are fetched; those scoring below
    /// `similarity_threshold` are dropped from the results but still counted
    /// in [`SearchOutcome::debug`].
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f64,
    ) -> Result<SearchOutcome> {
        let query_embedding = self.provider.embed_query(query)?;
        let neighbors = self.store.query(&query_embedding, limit)?;
        debug!("Store returned {} candidates for {:?}", neighbors.len(), query);

        Ok(rank(neighbors, similarity_threshold))
    }
}

/// Convert cosine distance to a similarity score rounded to 4 decimals
pub fn distance_to_similarity(distance: f32) -> f64 {
    round_score(raw_similarity(distance))
}

fn raw_similarity(distance: f32) -> f64 {
    (1.0 - f64::from(distance)).clamp(-1.0, 1.0)
}

fn round_score(similarity: f64) -> f64 {
    (similarity * 10_000.0).round() / 10_000.0
}

/// Score and filter store candidates, keeping the store's order
///
/// The threshold applies to the unrounded similarity; rounding is for
/// reporting only.
fn rank(neighbors: Vec<Neighbor>, similarity_threshold: f64) -> SearchOutcome {
    let mut scores = Vec::with_capacity(neighbors.len());
    let mut results = Vec::new();

    for neighbor in neighbors {
        let raw = raw_similarity(neighbor.distance);
        let similarity = round_score(raw);
        scores.push(similarity);

        if raw >= similarity_threshold {
            let chunk = neighbor.chunk;
            results.push(QueryResult {
                content: chunk.content,
                similarity_score: similarity,
                file_path: chunk.file_path,
                file_name: chunk.file_name,
                chunk_index: chunk.chunk_index,
                extension: chunk.extension,
            });
        }
    }

    SearchOutcome {
        results,
        debug: SimilarityStats::from_scores(scores),
    }
}

/// Format search results for terminal display
pub fn format_results(results: &[QueryResult], show_content: bool) -> String {
    let mut output = String::new();

    for (i, result) in results.iter().enumerate() {
        let location = format!("{}#{}", result.file_path, result.chunk_index);

        // Score indicator with color
        let score_pct = (result.similarity_score * 100.0) as u32;
        let score_color = if score_pct >= 80 {
            "green"
        } else if score_pct >= 60 {
            "yellow"
        } else {
            "red"
        };

        output.push_str(&format!(
            "\n{} {} ({}%)\n",
            format!("[{}]", i + 1).dimmed(),
            location.cyan().bold(),
            format!("{}", score_pct).color(score_color)
        ));

        if show_content {
            output.push_str(&format!("{}\n", "─".repeat(60).dimmed()));

            let lines: Vec<&str> = result.content.lines().collect();
            let max_lines = 15;
            for line in lines.iter().take(max_lines) {
                output.push_str(&format!("  {}\n", line));
            }

            if lines.len() > max_lines {
                output.push_str(&format!(
                    "{}\n",
                    format!("  ... ({} more lines)", lines.len() - max_lines).dimmed()
                ));
            }
        }
    }

    output
}

/// Format results as JSON
pub fn format_results_json(results: &[QueryResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}
